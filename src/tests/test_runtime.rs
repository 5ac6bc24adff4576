use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::executor::{initialize, send_sync, start_chart};
use crate::interpreter::InterpreterOptions;
use crate::logging::{LogLevel, RingLogAdapter};
use crate::reader::read_from_xml;

const DOOR: &str = "<scxml initial='closed'>\
   <state id='closed'>\
     <onentry><log expr=\"'closed'\"/></onentry>\
     <transition event='open' target='opened'/>\
   </state>\
   <state id='opened'>\
     <onentry><log expr=\"'opened'\"/></onentry>\
     <transition event='close' target='closed'/>\
     <transition event='lock' target='locked'/>\
   </state>\
   <final id='locked'>\
     <onentry><log expr=\"'locked'\"/></onentry>\
   </final>\
 </scxml>";

#[test]
fn synchronous_driver_is_a_pure_value_api() {
    let document = Arc::new(read_from_xml(DOOR).unwrap());
    let sc = initialize(document, InterpreterOptions::default());
    assert_eq!(sc.active_leaf_names(), vec!["closed"]);
    let sc = send_sync(sc, "open");
    assert_eq!(sc.active_leaf_names(), vec!["opened"]);
    let sc = send_sync(sc, "close");
    assert_eq!(sc.active_leaf_names(), vec!["closed"]);
}

#[test]
fn documents_are_shared_between_charts() {
    let document = Arc::new(read_from_xml(DOOR).unwrap());
    let first = initialize(document.clone(), InterpreterOptions::default());
    let second = initialize(document.clone(), InterpreterOptions::default());
    let first = send_sync(first, "open");
    // Each chart owns its own configuration.
    assert_eq!(first.active_leaf_names(), vec!["opened"]);
    assert_eq!(second.active_leaf_names(), vec!["closed"]);
}

#[test]
fn actor_driver_processes_events_in_order() {
    let ring = RingLogAdapter::default();
    let document = Arc::new(read_from_xml(DOOR).unwrap());
    let options =
        InterpreterOptions::default().with_log_adapter(Box::new(ring.clone()), LogLevel::Trace);
    let sc = initialize(document, options);
    let session = start_chart(sc);

    session.send("open").unwrap();
    session.send("close").unwrap();
    session.send("open").unwrap();
    session.send("lock").unwrap();
    // The session loop ends at the top-level final state.
    thread::sleep(Duration::from_millis(200));
    assert!(ring.contains(LogLevel::Info, "locked"));
    session.stop();
}

#[test]
fn actor_scheduler_fires_after_the_delay() {
    let ring = RingLogAdapter::default();
    let document = Arc::new(
        read_from_xml(
            "<scxml initial='idle'>\
               <state id='idle'>\
                 <transition event='arm' target='waiting'/>\
               </state>\
               <state id='waiting'>\
                 <onentry><send event='timeout' delay='50ms'/></onentry>\
                 <transition event='timeout' target='expired'/>\
               </state>\
               <state id='expired'>\
                 <onentry><log expr=\"'expired'\"/></onentry>\
               </state>\
             </scxml>",
        )
        .unwrap(),
    );
    let options =
        InterpreterOptions::default().with_log_adapter(Box::new(ring.clone()), LogLevel::Trace);
    let session = start_chart(initialize(document, options));
    session.send("arm").unwrap();
    thread::sleep(Duration::from_millis(400));
    assert!(ring.contains(LogLevel::Info, "expired"));
    session.stop();
}

#[test]
fn actor_sessions_route_outbound_sends() {
    let document = Arc::new(
        read_from_xml(
            "<scxml initial='a'>\
               <state id='a'>\
                 <transition event='go'>\
                   <send event='notify' target='mailbox://ops'/>\
                 </transition>\
               </state>\
             </scxml>",
        )
        .unwrap(),
    );
    let session = start_chart(initialize(document, InterpreterOptions::default()));
    session.send("go").unwrap();
    let mut outbound = None;
    for _ in 0..50 {
        outbound = session.poll_outbound();
        if outbound.is_some() {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    let outbound = outbound.expect("outbound event was not routed");
    assert_eq!(outbound.target, "mailbox://ops");
    assert_eq!(outbound.event.name, "notify");
    session.stop();
}

#[test]
fn delayed_sends_can_be_cancelled_by_id() {
    let ring = RingLogAdapter::default();
    let document = Arc::new(
        read_from_xml(
            "<scxml initial='idle'>\
               <state id='idle'>\
                 <transition event='arm' target='waiting'/>\
               </state>\
               <state id='waiting'>\
                 <onentry><send id='the_timer' event='timeout' delay='200ms'/></onentry>\
                 <transition event='timeout' target='expired'/>\
               </state>\
               <state id='expired'>\
                 <onentry><log expr=\"'expired'\"/></onentry>\
               </state>\
             </scxml>",
        )
        .unwrap(),
    );
    let options =
        InterpreterOptions::default().with_log_adapter(Box::new(ring.clone()), LogLevel::Trace);
    let session = start_chart(initialize(document, options));
    session.send("arm").unwrap();
    session.cancel_delayed("the_timer").unwrap();
    thread::sleep(Duration::from_millis(500));
    assert!(!ring.contains(LogLevel::Info, "expired"));
    session.stop();
}
