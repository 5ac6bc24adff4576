//! Runtime drivers around the step engine.\
//! The synchronous driver is a pure-value API: one call per external event,
//! delayed sends execute immediately with a warning. The actor driver wraps
//! the same step function behind a message loop in a worker thread, with
//! real timers for delayed sends and send-id based cancellation.

use std::collections::HashMap;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::thread::JoinHandle;

use crate::common::{error, info};
use crate::document::Document;
use crate::interpreter::{
    DelayedSendScheduler, Event, EventRouter, InterpreterOptions, StateChart,
};

/// Creates a state chart and performs the initialization macrostep.
pub fn initialize(document: Arc<Document>, options: InterpreterOptions) -> StateChart {
    StateChart::initialize(document, options)
}

/// Performs one external-event step: the event and everything it triggers
/// (internal events, eventless chains) is processed to the fixed point.
pub fn send_sync(mut state_chart: StateChart, event: impl Into<Event>) -> StateChart {
    state_chart.send_event(event);
    state_chart
}

/// Messages understood by a chart session's actor loop.
pub enum SessionMessage {
    Event(Event),
    CancelDelayed(String),
    Stop,
}

/// An event the chart addressed at an external target, handed over by the
/// session's outbound router for delivery by the embedding application.
#[derive(Debug, Clone)]
pub struct OutboundEvent {
    pub target: String,
    pub event: Event,
}

/// Handle to a running chart session.
pub struct ChartSession {
    sender: Sender<SessionMessage>,
    outbound: Receiver<OutboundEvent>,
    session_thread: Option<JoinHandle<()>>,
}

impl ChartSession {
    /// Enqueues an external event; the session processes it cooperatively.
    pub fn send_event(&self, event: impl Into<Event>) -> Result<(), String> {
        self.sender
            .send(SessionMessage::Event(event.into()))
            .map_err(|e| format!("session is gone: {}", e))
    }

    pub fn send(&self, name: &str) -> Result<(), String> {
        self.send_event(Event::new_external(name))
    }

    /// Cancels a delayed send scheduled by this session.
    pub fn cancel_delayed(&self, send_id: &str) -> Result<(), String> {
        self.sender
            .send(SessionMessage::CancelDelayed(send_id.to_string()))
            .map_err(|e| format!("session is gone: {}", e))
    }

    /// Next event the chart sent to an external target, if any.\
    /// The embedding application decides how to deliver it.
    pub fn poll_outbound(&self) -> Option<OutboundEvent> {
        self.outbound.try_recv().ok()
    }

    /// Stops the session and waits for the worker thread.
    pub fn stop(mut self) {
        let _ = self.sender.send(SessionMessage::Stop);
        self.join();
    }

    fn join(&mut self) {
        if let Some(handle) = self.session_thread.take() {
            if handle.join().is_err() {
                error!("chart session thread panicked");
            }
        }
    }
}

impl Drop for ChartSession {
    fn drop(&mut self) {
        let _ = self.sender.send(SessionMessage::Stop);
        self.join();
    }
}

/// Timer-backed scheduler for delayed sends. Guards are keyed by send-id;
/// dropping a guard cancels the timer.
struct TimerScheduler {
    timer: timer::Timer,
    sender: Sender<SessionMessage>,
    guards: Arc<Mutex<HashMap<String, timer::Guard>>>,
}

impl TimerScheduler {
    fn new(sender: Sender<SessionMessage>) -> TimerScheduler {
        TimerScheduler {
            timer: timer::Timer::new(),
            sender,
            guards: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

/// Router installed by the actor driver: outbound sends are forwarded to
/// the session's outbound channel.
struct ChannelRouter {
    sender: Sender<OutboundEvent>,
}

impl EventRouter for ChannelRouter {
    fn route(&mut self, target: &str, event: Event) -> Result<(), String> {
        self.sender
            .send(OutboundEvent {
                target: target.to_string(),
                event,
            })
            .map_err(|_| "outbound channel is closed".to_string())
    }
}

impl DelayedSendScheduler for TimerScheduler {
    fn schedule(&mut self, send_id: &str, delay_ms: u64, event: Event) {
        let sender = self.sender.clone();
        let guards = self.guards.clone();
        let key = send_id.to_string();
        let guard = self.timer.schedule_with_delay(
            chrono::Duration::milliseconds(delay_ms as i64),
            move || {
                guards.lock().unwrap().remove(&key);
                // The session may already be gone, the event is discarded
                // then.
                let _ = sender.send(SessionMessage::Event(event.clone()));
            },
        );
        self.guards
            .lock()
            .unwrap()
            .insert(send_id.to_string(), guard);
    }

    fn cancel(&mut self, send_id: &str) -> bool {
        self.guards.lock().unwrap().remove(send_id).is_some()
    }
}

/// Starts the chart inside a worker thread.\
/// One thread per chart instance; message handling is cooperative, a
/// macrostep is never interrupted. The session ends when the chart enters a
/// top-level final state or [ChartSession::stop] is called.
pub fn start_chart(mut state_chart: StateChart) -> ChartSession {
    let (sender, receiver) = channel::<SessionMessage>();
    let (outbound_sender, outbound) = channel::<OutboundEvent>();
    state_chart.set_scheduler(Box::new(TimerScheduler::new(sender.clone())));
    state_chart.set_router(Box::new(ChannelRouter {
        sender: outbound_sender,
    }));

    let session_thread = thread::Builder::new()
        .name("chart_session".to_string())
        .spawn(move || {
            info!("chart session starting");
            while let Ok(message) = receiver.recv() {
                match message {
                    SessionMessage::Event(event) => {
                        state_chart.send_event(event);
                        if !state_chart.is_running() {
                            break;
                        }
                    }
                    SessionMessage::CancelDelayed(send_id) => {
                        state_chart.cancel_delayed_send(send_id.as_str());
                    }
                    SessionMessage::Stop => break,
                }
            }
            info!("chart session finished");
        })
        .unwrap();

    ChartSession {
        sender,
        outbound,
        session_thread: Some(session_thread),
    }
}
