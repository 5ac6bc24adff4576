use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::datamodel::Data;
use crate::interpreter::{
    Event, EventRouter, InterpreterOptions, Invocation, InvokeHandler, InvokeResult, StateChart,
};
use crate::logging::{LogLevel, RingLogAdapter};
use crate::reader::read_from_xml;

fn chart(xml: &str) -> StateChart {
    StateChart::initialize(
        Arc::new(read_from_xml(xml).unwrap()),
        InterpreterOptions::default(),
    )
}

fn chart_with_ring(xml: &str, ring: &RingLogAdapter) -> StateChart {
    let options = InterpreterOptions::default()
        .with_log_adapter(Box::new(ring.clone()), LogLevel::Trace);
    StateChart::initialize(Arc::new(read_from_xml(xml).unwrap()), options)
}

fn assert_leaves(sc: &StateChart, expected: &[&str]) {
    assert_eq!(sc.active_leaf_names(), expected);
    // Microstep atomicity: every observable configuration is valid.
    sc.configuration.validate(&sc.document).unwrap();
    assert_eq!(sc.queue_sizes(), (0, 0));
}

#[test]
fn traffic_light_cycles() {
    let mut sc = chart(
        "<scxml initial='red'>\
           <state id='red'><transition event='timer' target='green'/></state>\
           <state id='green'><transition event='timer' target='yellow'/></state>\
           <state id='yellow'><transition event='timer' target='red'/></state>\
         </scxml>",
    );
    assert_leaves(&sc, &["red"]);
    sc.send_event("timer");
    assert_leaves(&sc, &["green"]);
    for _ in 0..3 {
        sc.send_event("timer");
    }
    assert_leaves(&sc, &["red"]);
}

#[test]
fn compound_auto_entry() {
    let sc = chart(
        "<scxml initial='parent'>\
           <state id='parent' initial='child1'>\
             <state id='child1'/><state id='child2'/>\
           </state>\
         </scxml>",
    );
    assert_leaves(&sc, &["child1"]);
    assert!(sc.in_state("parent"));
    assert!(sc.in_state("child1"));
    assert!(!sc.in_state("child2"));
}

#[test]
fn eventless_chain_runs_to_fixpoint() {
    let sc = chart(
        "<scxml initial='a'>\
           <state id='a'><transition target='b'/></state>\
           <state id='b'><transition target='c'/></state>\
           <state id='c'><transition target='d'/></state>\
           <state id='d'/>\
         </scxml>",
    );
    assert_leaves(&sc, &["d"]);
}

#[test]
fn parallel_regions_step_independently() {
    let mut sc = chart(
        "<scxml initial='app'>\
           <parallel id='app'>\
             <state id='ui' initial='idle'>\
               <state id='idle'><transition event='click' target='busy'/></state>\
               <state id='busy'/>\
             </state>\
             <state id='network' initial='offline'>\
               <state id='offline'><transition event='connect' target='online'/></state>\
               <state id='online'/>\
             </state>\
           </parallel>\
         </scxml>",
    );
    assert_leaves(&sc, &["idle", "offline"]);
    sc.send_event("connect");
    assert_leaves(&sc, &["idle", "online"]);
    sc.send_event("click");
    assert_leaves(&sc, &["busy", "online"]);
}

#[test]
fn child_transition_wins_over_ancestor() {
    let mut sc = chart(
        "<scxml initial='parent'>\
           <state id='parent' initial='child'>\
             <state id='child'><transition event='t' target='sibling'/></state>\
             <state id='sibling'/>\
             <transition event='t' target='outside'/>\
           </state>\
           <state id='outside'/>\
         </scxml>",
    );
    sc.send_event("t");
    assert_leaves(&sc, &["sibling"]);
}

#[test]
fn conflicting_parallel_transitions_prefer_the_earlier_region() {
    let mut sc = chart(
        "<scxml initial='p'>\
           <parallel id='p'>\
             <state id='ra' initial='s1'>\
               <state id='s1'><transition event='t' target='s2'/></state>\
               <state id='s2'/>\
             </state>\
             <state id='rb' initial='s3'>\
               <state id='s3'><transition event='t' target='outside'/></state>\
             </state>\
           </parallel>\
           <state id='outside'/>\
         </scxml>",
    );
    sc.send_event("t");
    // The region-local transition was selected first; the one exiting the
    // parallel state conflicts with it and is dropped.
    assert_leaves(&sc, &["s2", "s3"]);
}

#[test]
fn foreach_sums_and_scopes_variables() {
    let sc = chart(
        "<scxml initial='s'>\
           <datamodel>\
             <data id='sum' expr='0'/>\
             <data id='list' expr='[1,2,3]'/>\
           </datamodel>\
           <state id='s'>\
             <onentry>\
               <foreach item='x' array='list'>\
                 <assign location='sum' expr='sum + x'/>\
               </foreach>\
             </onentry>\
           </state>\
         </scxml>",
    );
    assert_eq!(sc.datamodel.get("sum"), Some(&Data::Integer(6)));
    // Newly declared loop variables keep their final value.
    assert_eq!(sc.datamodel.get("x"), Some(&Data::Integer(3)));
    assert_eq!(
        sc.datamodel.get("list"),
        Some(&Data::Array(vec![
            Data::Integer(1),
            Data::Integer(2),
            Data::Integer(3)
        ]))
    );
}

#[test]
fn foreach_restores_pre_existing_variables() {
    let sc = chart(
        "<scxml initial='s'>\
           <datamodel>\
             <data id='x' expr='99'/>\
             <data id='i' expr='42'/>\
             <data id='seen' expr='0'/>\
           </datamodel>\
           <state id='s'>\
             <onentry>\
               <foreach item='x' index='i' array='[7,8]'>\
                 <assign location='seen' expr='seen + x + i'/>\
               </foreach>\
             </onentry>\
           </state>\
         </scxml>",
    );
    // 7 + 0 + 8 + 1
    assert_eq!(sc.datamodel.get("seen"), Some(&Data::Integer(16)));
    // Both shadowed variables are restored to their pre-loop values.
    assert_eq!(sc.datamodel.get("x"), Some(&Data::Integer(99)));
    assert_eq!(sc.datamodel.get("i"), Some(&Data::Integer(42)));
}

#[test]
fn foreach_over_non_sequence_raises_error_execution() {
    let mut sc = chart(
        "<scxml initial='s'>\
           <datamodel><data id='notlist' expr='42'/><data id='hit' expr='false'/></datamodel>\
           <state id='s'>\
             <transition event='go'>\
               <foreach item='x' array='notlist'>\
                 <assign location='hit' expr='true'/>\
               </foreach>\
             </transition>\
             <transition event='error.execution' target='err'/>\
           </state>\
           <state id='err'/>\
         </scxml>",
    );
    assert_leaves(&sc, &["s"]);
    sc.send_event("go");
    assert_leaves(&sc, &["err"]);
    // The loop body never ran, the loop variable was never declared.
    assert_eq!(sc.datamodel.get("hit"), Some(&Data::Boolean(false)));
    assert_eq!(sc.datamodel.get("x"), None);
}

#[test]
fn conditions_gate_transitions() {
    let mut sc = chart(
        "<scxml initial='s'>\
           <datamodel><data id='count' expr='0'/></datamodel>\
           <state id='s'>\
             <onentry><assign location='count' expr='count + 1'/></onentry>\
             <transition event='go' cond='count &gt; 1' target='t'/>\
           </state>\
           <state id='t'/>\
         </scxml>",
    );
    sc.send_event("go");
    // count is 1, the condition is false.
    assert_leaves(&sc, &["s"]);
    sc.datamodel.set("count", Data::Integer(5));
    sc.send_event("go");
    assert_leaves(&sc, &["t"]);
}

#[test]
fn erroring_condition_disables_the_transition() {
    let mut sc = chart(
        "<scxml initial='s'>\
           <state id='s'>\
             <transition event='go' cond='1 % 0' target='bad'/>\
             <transition event='go' target='ok'/>\
           </state>\
           <state id='bad'/><state id='ok'/>\
         </scxml>",
    );
    sc.send_event("go");
    assert_leaves(&sc, &["ok"]);
}

#[test]
fn failing_assign_raises_assign_execution() {
    let mut sc = chart(
        "<scxml initial='s'>\
           <datamodel><data id='n' expr='5'/></datamodel>\
           <state id='s'>\
             <transition event='go'><assign location='n.x' expr='1'/></transition>\
             <transition event='error.execution' cond=\"_event.data.type == 'assign.execution'\" target='err'/>\
           </state>\
           <state id='err'/>\
         </scxml>",
    );
    sc.send_event("go");
    assert_leaves(&sc, &["err"]);
    assert_eq!(sc.datamodel.get("n"), Some(&Data::Integer(5)));
}

#[test]
fn actions_after_a_failed_action_still_run() {
    let mut sc = chart(
        "<scxml initial='s'>\
           <datamodel><data id='n' expr='5'/><data id='after' expr='false'/></datamodel>\
           <state id='s'>\
             <transition event='go'>\
               <assign location='n.x' expr='1'/>\
               <assign location='after' expr='true'/>\
             </transition>\
           </state>\
         </scxml>",
    );
    sc.send_event("go");
    assert_eq!(sc.datamodel.get("after"), Some(&Data::Boolean(true)));
}

#[test]
fn if_elseif_else_runs_exactly_one_block() {
    let mut sc = chart(
        "<scxml initial='s'>\
           <datamodel><data id='n' expr='2'/><data id='branch' expr=\"''\"/></datamodel>\
           <state id='s'>\
             <transition event='go'>\
               <if cond='n == 1'>\
                 <assign location='branch' expr=\"'one'\"/>\
               <elseif cond='n == 2'/>\
                 <assign location='branch' expr=\"'two'\"/>\
               <else/>\
                 <assign location='branch' expr=\"'other'\"/>\
               </if>\
             </transition>\
           </state>\
         </scxml>",
    );
    sc.send_event("go");
    assert_eq!(
        sc.datamodel.get("branch"),
        Some(&Data::String("two".to_string()))
    );
}

#[test]
fn raise_feeds_the_internal_queue() {
    let mut sc = chart(
        "<scxml initial='a'>\
           <state id='a'>\
             <transition event='go' target='b'/>\
           </state>\
           <state id='b'>\
             <onentry><raise event='continue'/></onentry>\
             <transition event='continue' target='c'/>\
           </state>\
           <state id='c'/>\
         </scxml>",
    );
    sc.send_event("go");
    // The internal event is processed before send_event returns.
    assert_leaves(&sc, &["c"]);
}

#[test]
fn raise_without_event_uses_anonymous_name() {
    let mut sc = chart(
        "<scxml initial='a'>\
           <state id='a'>\
             <transition event='go'><raise/></transition>\
             <transition event='anonymous_event' target='b'/>\
           </state>\
           <state id='b'/>\
         </scxml>",
    );
    sc.send_event("go");
    assert_leaves(&sc, &["b"]);
}

#[test]
fn targetless_transition_fires_actions_only() {
    let mut sc = chart(
        "<scxml initial='s'>\
           <datamodel><data id='count' expr='0'/><data id='exited' expr='false'/></datamodel>\
           <state id='s'>\
             <onexit><assign location='exited' expr='true'/></onexit>\
             <transition event='poke'><assign location='count' expr='count + 1'/></transition>\
           </state>\
         </scxml>",
    );
    sc.send_event("poke");
    sc.send_event("poke");
    assert_leaves(&sc, &["s"]);
    assert_eq!(sc.datamodel.get("count"), Some(&Data::Integer(2)));
    // No exit/entry happened, a targetless transition is not a
    // self-transition.
    assert_eq!(sc.datamodel.get("exited"), Some(&Data::Boolean(false)));
}

#[test]
fn shallow_history_restores_the_last_child() {
    let mut sc = chart(
        "<scxml initial='on'>\
           <state id='on' initial='a'>\
             <history id='h' type='shallow'><transition target='a'/></history>\
             <state id='a'><transition event='next' target='b'/></state>\
             <state id='b'/>\
             <transition event='off' target='off'/>\
           </state>\
           <state id='off'><transition event='resume' target='h'/></state>\
         </scxml>",
    );
    sc.send_event("next");
    assert_leaves(&sc, &["b"]);
    sc.send_event("off");
    assert_leaves(&sc, &["off"]);
    sc.send_event("resume");
    assert_leaves(&sc, &["b"]);
}

#[test]
fn deep_history_restores_nested_leaves() {
    let mut sc = chart(
        "<scxml initial='on'>\
           <state id='on' initial='p'>\
             <history id='h' type='deep'><transition target='p'/></history>\
             <state id='p' initial='p1'>\
               <state id='p1'><transition event='next' target='p2'/></state>\
               <state id='p2'/>\
             </state>\
             <transition event='off' target='off'/>\
           </state>\
           <state id='off'><transition event='resume' target='h'/></state>\
         </scxml>",
    );
    sc.send_event("next");
    sc.send_event("off");
    sc.send_event("resume");
    assert_leaves(&sc, &["p2"]);
}

#[test]
fn history_without_record_enters_the_default() {
    let mut sc = chart(
        "<scxml initial='off'>\
           <state id='on' initial='a'>\
             <history id='h' type='shallow'><transition target='b'/></history>\
             <state id='a'/>\
             <state id='b'/>\
           </state>\
           <state id='off'><transition event='resume' target='h'/></state>\
         </scxml>",
    );
    assert_leaves(&sc, &["off"]);
    sc.send_event("resume");
    assert_leaves(&sc, &["b"]);
}

#[test]
fn final_state_raises_done_state() {
    let mut sc = chart(
        "<scxml initial='m'>\
           <state id='m' initial='work'>\
             <state id='work'><transition event='finish' target='done_child'/></state>\
             <final id='done_child'/>\
             <transition event='done.state.m' target='after'/>\
           </state>\
           <state id='after'/>\
         </scxml>",
    );
    sc.send_event("finish");
    assert_leaves(&sc, &["after"]);
}

#[test]
fn parallel_completion_raises_done_state_for_the_parallel() {
    let mut sc = chart(
        "<scxml initial='p'>\
           <parallel id='p'>\
             <state id='r1' initial='w1'>\
               <state id='w1'><transition event='f1' target='d1'/></state>\
               <final id='d1'/>\
             </state>\
             <state id='r2' initial='w2'>\
               <state id='w2'><transition event='f2' target='d2'/></state>\
               <final id='d2'/>\
             </state>\
             <transition event='done.state.p' target='finished'/>\
           </parallel>\
           <state id='finished'/>\
         </scxml>",
    );
    sc.send_event("f1");
    assert_leaves(&sc, &["d1", "w2"]);
    sc.send_event("f2");
    assert_leaves(&sc, &["finished"]);
}

#[test]
fn top_level_final_stops_the_interpreter() {
    let mut sc = chart(
        "<scxml initial='go'>\
           <state id='go'><transition event='quit' target='end'/></state>\
           <final id='end'/>\
         </scxml>",
    );
    assert!(sc.is_running());
    sc.send_event("quit");
    assert_eq!(sc.active_leaf_names(), vec!["end"]);
    assert!(!sc.is_running());
    // Further events are discarded.
    sc.send_event("quit");
    assert_eq!(sc.active_leaf_names(), vec!["end"]);
    assert_eq!(sc.queue_sizes(), (0, 0));
}

#[test]
fn empty_document_stays_empty() {
    let mut sc = chart("<scxml/>");
    assert!(sc.active_leaf_names().is_empty());
    assert!(!sc.is_running());
    sc.send_event("anything");
    assert!(sc.active_leaf_names().is_empty());
}

#[test]
fn microstep_cap_leaves_a_stable_configuration() {
    let ring = RingLogAdapter::default();
    let options = InterpreterOptions::default()
        .with_log_adapter(Box::new(ring.clone()), LogLevel::Trace)
        .with_microstep_limit(6);
    let sc = StateChart::initialize(
        Arc::new(
            read_from_xml(
                "<scxml initial='a'>\
                   <state id='a'><transition target='b'/></state>\
                   <state id='b'><transition target='a'/></state>\
                 </scxml>",
            )
            .unwrap(),
        ),
        options,
    );
    assert!(ring.contains(LogLevel::Warn, "microstep limit"));
    assert_eq!(sc.active_leaf_names().len(), 1);
    sc.configuration.validate(&sc.document).unwrap();
}

#[test]
fn internal_send_target_posts_to_the_internal_queue() {
    let mut sc = chart(
        "<scxml initial='a'>\
           <state id='a'>\
             <transition event='go'><send event='kick' target='#_internal'/></transition>\
             <transition event='kick' target='b'/>\
           </state>\
           <state id='b'/>\
         </scxml>",
    );
    sc.send_event("go");
    assert_leaves(&sc, &["b"]);
}

#[test]
fn send_without_target_posts_to_the_own_external_queue() {
    let mut sc = chart(
        "<scxml initial='a'>\
           <state id='a'>\
             <transition event='go'><send event='kick'/></transition>\
             <transition event='kick' target='b'/>\
           </state>\
           <state id='b'/>\
         </scxml>",
    );
    sc.send_event("go");
    assert_leaves(&sc, &["b"]);
}

#[test]
fn send_params_become_event_data() {
    let mut sc = chart(
        "<scxml initial='a'>\
           <state id='a'>\
             <transition event='go'>\
               <send event='pay'><param name='amount' expr='5'/></send>\
             </transition>\
             <transition event='pay' cond='_event.data.amount == 5' target='paid'/>\
           </state>\
           <state id='paid'/>\
         </scxml>",
    );
    sc.send_event("go");
    assert_leaves(&sc, &["paid"]);
}

#[test]
fn send_namelist_merges_variables() {
    let mut sc = chart(
        "<scxml initial='a'>\
           <datamodel><data id='user' expr=\"'ada'\"/></datamodel>\
           <state id='a'>\
             <transition event='go'>\
               <send event='login' namelist='user'/>\
             </transition>\
             <transition event='login' cond=\"_event.data.user == 'ada'\" target='in'/>\
           </state>\
           <state id='in'/>\
         </scxml>",
    );
    sc.send_event("go");
    assert_leaves(&sc, &["in"]);
}

#[test]
fn delayed_send_in_sync_driver_warns_and_sends_immediately() {
    let ring = RingLogAdapter::default();
    let mut sc = chart_with_ring(
        "<scxml initial='a'>\
           <state id='a'>\
             <transition event='go'><send event='kick' delay='50ms'/></transition>\
             <transition event='kick' target='b'/>\
           </state>\
           <state id='b'/>\
         </scxml>",
        &ring,
    );
    sc.send_event("go");
    assert_leaves(&sc, &["b"]);
    assert!(ring.contains(LogLevel::Warn, "not supported by this driver"));
}

#[test]
fn malformed_delay_falls_back_to_zero_with_a_warning() {
    let ring = RingLogAdapter::default();
    let mut sc = chart_with_ring(
        "<scxml initial='a'>\
           <state id='a'>\
             <transition event='go'><send event='kick' delay='soon'/></transition>\
             <transition event='kick' target='b'/>\
           </state>\
           <state id='b'/>\
         </scxml>",
        &ring,
    );
    sc.send_event("go");
    assert_leaves(&sc, &["b"]);
    assert!(ring.contains(LogLevel::Warn, "malformed delay"));
}

#[test]
fn unsupported_send_target_raises_error_communication() {
    // No outbound router attached, the target cannot be delivered.
    let mut sc = chart(
        "<scxml initial='a'>\
           <state id='a'>\
             <transition event='go'><send event='x' target='http://elsewhere'/></transition>\
             <transition event='error.communication' target='failed'/>\
           </state>\
           <state id='failed'/>\
         </scxml>",
    );
    sc.send_event("go");
    assert_leaves(&sc, &["failed"]);
}

struct RecordingRouter {
    seen: Arc<Mutex<Vec<(String, String)>>>,
}

impl EventRouter for RecordingRouter {
    fn route(&mut self, target: &str, event: Event) -> Result<(), String> {
        self.seen
            .lock()
            .unwrap()
            .push((target.to_string(), event.name));
        Ok(())
    }
}

#[test]
fn routed_send_targets_reach_the_registered_router() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut sc = chart(
        "<scxml initial='a'>\
           <state id='a'>\
             <transition event='go'>\
               <send event='ping' target='mailbox://ops'/>\
             </transition>\
             <transition event='error.communication' target='failed'/>\
           </state>\
           <state id='failed'/>\
         </scxml>",
    );
    sc.set_router(Box::new(RecordingRouter { seen: seen.clone() }));
    sc.send_event("go");
    // Delivered through the router; no error.communication was raised.
    assert_leaves(&sc, &["a"]);
    assert_eq!(
        seen.lock().unwrap().as_slice(),
        &[("mailbox://ops".to_string(), "ping".to_string())]
    );
}

#[test]
fn in_predicate_sees_parallel_siblings() {
    let mut sc = chart(
        "<scxml initial='p'>\
           <parallel id='p'>\
             <state id='x' initial='x1'><state id='x1'/></state>\
             <state id='y' initial='y1'>\
               <state id='y1'><transition event='check' cond=\"In('x1')\" target='y2'/></state>\
               <state id='y2'/>\
             </state>\
           </parallel>\
         </scxml>",
    );
    sc.send_event("check");
    assert_leaves(&sc, &["x1", "y2"]);
}

#[test]
fn log_action_emits_at_info_level() {
    let ring = RingLogAdapter::default();
    let _sc = chart_with_ring(
        "<scxml initial='s'>\
           <datamodel><data id='n' expr='41'/></datamodel>\
           <state id='s'>\
             <onentry><log label='answer' expr='n + 1'/></onentry>\
           </state>\
         </scxml>",
        &ring,
    );
    assert!(ring.contains(LogLevel::Info, "answer: 42"));
}

#[test]
fn data_bodies_parse_as_json() {
    let sc = chart(
        "<scxml initial='s'>\
           <datamodel>\
             <data id='config'>{\"retries\": 3, \"verbose\": true}</data>\
             <data id='label'>plain text</data>\
           </datamodel>\
           <state id='s'/>\
         </scxml>",
    );
    let mut expected = HashMap::new();
    expected.insert("retries".to_string(), Data::Integer(3));
    expected.insert("verbose".to_string(), Data::Boolean(true));
    assert_eq!(sc.datamodel.get("config"), Some(&Data::Map(expected)));
    assert_eq!(
        sc.datamodel.get("label"),
        Some(&Data::String("plain text".to_string()))
    );
}

struct RecordingHandler {
    calls: Arc<Mutex<Vec<Invocation>>>,
    result: InvokeResult,
}

impl InvokeHandler for RecordingHandler {
    fn invoke(&mut self, invocation: &Invocation) -> InvokeResult {
        self.calls.lock().unwrap().push(invocation.clone());
        self.result.clone()
    }
}

#[test]
fn invoke_dispatches_through_the_registry() {
    // Invoke support is registry-dispatch only; skip if it ever drops off.
    if crate::common::FeatureRegistry::new().support("invoke")
        == crate::common::FeatureSupport::Unsupported
    {
        return;
    }
    let calls = Arc::new(Mutex::new(Vec::new()));
    let options = InterpreterOptions::default().with_invoke_handler(
        "echo",
        Box::new(RecordingHandler {
            calls: calls.clone(),
            result: InvokeResult::OkWithData(HashMap::from([(
                "answer".to_string(),
                Data::Integer(42),
            )])),
        }),
    );
    let sc = StateChart::initialize(
        Arc::new(
            read_from_xml(
                "<scxml initial='s'>\
                   <state id='s'>\
                     <invoke type='echo' id='job1'><param name='q' expr='7'/></invoke>\
                     <transition event='done.invoke.job1' cond='_event.data.answer == 42' target='t'/>\
                   </state>\
                   <state id='t'/>\
                 </scxml>",
            )
            .unwrap(),
        ),
        options,
    );
    assert_eq!(sc.active_leaf_names(), vec!["t"]);
    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].invoke_id.as_deref(), Some("job1"));
    assert_eq!(calls[0].params.get("q"), Some(&Data::Integer(7)));
}

#[test]
fn invoke_without_handler_raises_error_execution() {
    let sc = chart(
        "<scxml initial='s'>\
           <state id='s'>\
             <invoke type='nope'/>\
             <transition event='error.execution' target='failed'/>\
           </state>\
           <state id='failed'/>\
         </scxml>",
    );
    assert_eq!(sc.active_leaf_names(), vec!["failed"]);
}

#[test]
fn invoke_handler_errors_map_to_error_events() {
    let options = InterpreterOptions::default().with_invoke_handler(
        "flaky",
        Box::new(RecordingHandler {
            calls: Arc::new(Mutex::new(Vec::new())),
            result: InvokeResult::CommunicationError("line busy".to_string()),
        }),
    );
    let sc = StateChart::initialize(
        Arc::new(
            read_from_xml(
                "<scxml initial='s'>\
                   <state id='s'>\
                     <invoke type='flaky'/>\
                     <transition event='error.communication' target='failed'/>\
                   </state>\
                   <state id='failed'/>\
                 </scxml>",
            )
            .unwrap(),
        ),
        options,
    );
    assert_eq!(sc.active_leaf_names(), vec!["failed"]);
}

#[test]
fn wildcard_descriptors_match_any_event() {
    let mut sc = chart(
        "<scxml initial='a'>\
           <state id='a'><transition event='*' target='b'/></state>\
           <state id='b'/>\
         </scxml>",
    );
    sc.send_event("whatever.happened");
    assert_leaves(&sc, &["b"]);
}

#[test]
fn prefix_descriptors_match_on_token_boundaries() {
    let mut sc = chart(
        "<scxml initial='a'>\
           <state id='a'>\
             <transition event='user' target='hit'/>\
           </state>\
           <state id='hit'><transition event='reset' target='a'/></state>\
         </scxml>",
    );
    sc.send_event("username");
    assert_leaves(&sc, &["a"]);
    sc.send_event("user.login.failed");
    assert_leaves(&sc, &["hit"]);
}

#[test]
fn history_tracker_recording_is_idempotent() {
    let sc = chart(
        "<scxml initial='on'>\
           <state id='on' initial='a'>\
             <history id='h'><transition target='a'/></history>\
             <state id='a'/><state id='b'/>\
           </state>\
         </scxml>",
    );
    let on = sc.document.find_state("on").unwrap().id;
    let leaves = sc.configuration.active_leaves();
    let mut tracker1 = sc.history.clone();
    tracker1.record(on, &leaves, &sc.document);
    let mut tracker2 = tracker1.clone();
    tracker2.record(on, &leaves, &sc.document);
    assert_eq!(tracker1, tracker2);
    assert!(tracker1.has_history(on));
    tracker1.clear(on);
    assert!(!tracker1.has_history(on));
}

#[test]
fn invalid_leaf_sets_are_rejected() {
    let sc = chart(
        "<scxml initial='parent'>\
           <state id='parent' initial='child1'>\
             <state id='child1'/><state id='child2'/>\
           </state>\
         </scxml>",
    );
    let parent = sc.document.find_state("parent").unwrap().id;
    let child1 = sc.document.find_state("child1").unwrap().id;
    let child2 = sc.document.find_state("child2").unwrap().id;

    // A compound state is not a leaf.
    assert!(crate::configuration::Configuration::with_leaves(&sc.document, vec![parent]).is_err());
    // Two active children of one compound state.
    assert!(
        crate::configuration::Configuration::with_leaves(&sc.document, vec![child1, child2])
            .is_err()
    );
    assert!(crate::configuration::Configuration::with_leaves(&sc.document, vec![child1]).is_ok());
}

#[test]
fn current_event_is_visible_to_conditions() {
    let mut sc = chart(
        "<scxml initial='a'>\
           <state id='a'>\
             <transition event='msg' cond=\"_event.name == 'msg'\" target='b'/>\
           </state>\
           <state id='b'/>\
         </scxml>",
    );
    let mut data = HashMap::new();
    data.insert("k".to_string(), Data::Integer(1));
    sc.send_event(Event::new_external("msg").with_data(data));
    assert_leaves(&sc, &["b"]);
}
