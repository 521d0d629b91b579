//! Channels and processes working together on a live worker pool.

mod common;

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use common::{test_executor_config, wait_until, LineSink, StubEventBus};
use mudcore::channels::{ChannelReceiver, TextChannel, TextLine};
use mudcore::events::EventBus;
use mudcore::executor::message::{FlowStatus, ProcessMessage};
use mudcore::executor::{Executor, Process, ProcessServices, ProcessStatus};
use mudcore::types::{Pid, Rid};

fn start_executor() -> Executor {
    let bus = StubEventBus::new();
    let executor = Executor::start(test_executor_config(), bus.clone() as Arc<dyn EventBus>);
    bus.set_scheduler(executor.scheduler().clone());
    executor
}

/// Process that receives on one channel and forwards every text line to
/// another.
struct EchoProcess {
    input: Arc<TextChannel>,
    output: Arc<TextChannel>,
    input_rid: Option<Rid>,
}

impl Process for EchoProcess {
    fn added(&mut self, pid: Pid, services: &mut ProcessServices<'_>) {
        self.input.mark_next_add_receiver(pid);
        self.input_rid = services.add_blocking_resource(self.input.as_resource()).ok();
        let _ = services.add_resource(self.output.as_resource());
    }

    fn execute(&mut self, _pid: Pid, _services: &mut ProcessServices<'_>) -> ProcessStatus {
        ProcessStatus::Blocked
    }

    fn execute_resource_message(
        &mut self,
        _pid: Pid,
        _services: &mut ProcessServices<'_>,
        rid: Rid,
        message: ProcessMessage,
    ) -> ProcessStatus {
        if self.input_rid == Some(rid) {
            if let ProcessMessage::TextChannel { line, .. } = message {
                if self.output.send(line).is_err() {
                    return ProcessStatus::Error;
                }
            }
        }
        ProcessStatus::Blocked
    }

    fn name(&self, _pid: Pid) -> String {
        "echo".to_string()
    }
}

#[test]
fn echo_round_trip_through_blocking_channel() {
    let mut executor = start_executor();
    let scheduler = executor.scheduler().clone();

    let input = TextChannel::new("echo_in", None, scheduler.clone());
    let output = TextChannel::new("echo_out", None, scheduler.clone());
    let sink = Arc::new(LineSink::default());
    assert!(output.register_receiver_callback(sink.clone() as Arc<dyn ChannelReceiver<TextLine>>));

    // The external transport side holds the input channel.
    let input_token = input.register_holder();

    let pid = executor
        .add_process(
            Box::new(EchoProcess {
                input: input.clone(),
                output: output.clone(),
                input_rid: None,
            }),
            None,
            None,
        )
        .unwrap();
    executor.start_process(pid);

    assert!(input.unblock(0));
    assert!(output.unblock(0));

    input.send(TextLine::plain("hello")).unwrap();
    wait_until(|| sink.contains("hello"), "echoed line");

    // The process is the channel's receiver; killing it closes both
    // channels during resource teardown.
    executor.kill_process(pid);
    wait_until(|| executor.scheduler().process_count() == 0, "teardown");
    wait_until(|| input.is_closed(), "input closed");
    wait_until(|| output.is_closed(), "output closed");

    input.unregister_holder(input_token);
    assert!(input.is_destructed());

    executor.shutdown();
}

/// A process blocked on two channels only becomes ready once both have
/// delivered.
#[test]
fn blocked_process_waits_for_every_blocking_resource() {
    let mut executor = start_executor();
    let scheduler = executor.scheduler().clone();

    struct DualBlocked {
        first: Arc<TextChannel>,
        second: Arc<TextChannel>,
        text_messages: Arc<AtomicU32>,
    }

    impl Process for DualBlocked {
        fn added(&mut self, pid: Pid, services: &mut ProcessServices<'_>) {
            self.first.mark_next_add_receiver(pid);
            let _ = services.add_blocking_resource(self.first.as_resource());
            self.second.mark_next_add_receiver(pid);
            let _ = services.add_blocking_resource(self.second.as_resource());
        }

        fn execute(&mut self, _pid: Pid, _services: &mut ProcessServices<'_>) -> ProcessStatus {
            ProcessStatus::Blocked
        }

        fn execute_resource_message(
            &mut self,
            _pid: Pid,
            _services: &mut ProcessServices<'_>,
            _rid: Rid,
            message: ProcessMessage,
        ) -> ProcessStatus {
            // Flow-status messages also arrive on these RIDs; count data
            // items only.
            if matches!(message, ProcessMessage::TextChannel { .. }) {
                self.text_messages.fetch_add(1, Ordering::SeqCst);
            }
            ProcessStatus::Blocked
        }

        fn name(&self, _pid: Pid) -> String {
            "dual blocked".to_string()
        }
    }

    let first = TextChannel::new("first", None, scheduler.clone());
    let second = TextChannel::new("second", None, scheduler.clone());
    let first_token = first.register_holder();
    let second_token = second.register_holder();

    let text_messages = Arc::new(AtomicU32::new(0));

    let pid = executor
        .add_process(
            Box::new(DualBlocked {
                first: first.clone(),
                second: second.clone(),
                text_messages: text_messages.clone(),
            }),
            None,
            None,
        )
        .unwrap();
    executor.start_process(pid);
    first.unblock(0);
    second.unblock(0);

    // Let the unblock flow messages drain and the process settle into
    // blocked on both RIDs.
    wait_until(
        || {
            scheduler.process_stats(pid).map(|s| s.state)
                == Some(mudcore::executor::ProcessState::Blocked)
        },
        "process blocked",
    );
    std::thread::sleep(std::time::Duration::from_millis(50));

    // One of two blocking resources delivers: still blocked.
    first.send(TextLine::plain("a")).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(100));
    assert_eq!(text_messages.load(Ordering::SeqCst), 0);

    // The second delivers: the current blocked set empties and both
    // messages drain in order.
    second.send(TextLine::plain("b")).unwrap();
    wait_until(
        || text_messages.load(Ordering::SeqCst) == 2,
        "both text messages",
    );

    executor.kill_process(pid);
    wait_until(|| executor.scheduler().process_count() == 0, "teardown");
    first.unregister_holder(first_token);
    second.unregister_holder(second_token);

    executor.shutdown();
}

/// Flow transitions reach process senders as channel-flow messages.
#[test]
fn process_sender_sees_flow_transitions() {
    let mut executor = start_executor();
    let scheduler = executor.scheduler().clone();

    struct SenderSide {
        channel: Arc<TextChannel>,
        statuses: Arc<Mutex<Vec<FlowStatus>>>,
    }

    impl Process for SenderSide {
        fn added(&mut self, _pid: Pid, services: &mut ProcessServices<'_>) {
            let _ = services.add_resource(self.channel.as_resource());
        }

        fn execute(&mut self, _pid: Pid, _services: &mut ProcessServices<'_>) -> ProcessStatus {
            ProcessStatus::WaitMessage
        }

        fn execute_resource_message(
            &mut self,
            _pid: Pid,
            _services: &mut ProcessServices<'_>,
            _rid: Rid,
            message: ProcessMessage,
        ) -> ProcessStatus {
            if let ProcessMessage::ChannelFlow { status, .. } = message {
                self.statuses.lock().push(status);
            }
            ProcessStatus::WaitMessage
        }

        fn name(&self, _pid: Pid) -> String {
            "sender side".to_string()
        }
    }

    let channel = TextChannel::new("flow", None, scheduler.clone());
    let token = channel.register_holder();
    let statuses = Arc::new(Mutex::new(Vec::new()));

    let pid = executor
        .add_process(
            Box::new(SenderSide {
                channel: channel.clone(),
                statuses: statuses.clone(),
            }),
            None,
            None,
        )
        .unwrap();
    executor.start_process(pid);
    wait_until(|| executor.scheduler().process_stats(pid).is_some(), "admitted");

    channel.unblock(0);
    channel.block();
    channel.close();

    wait_until(|| statuses.lock().len() == 3, "three transitions");
    assert_eq!(
        *statuses.lock(),
        vec![FlowStatus::Open, FlowStatus::Blocked, FlowStatus::Closed]
    );

    executor.kill_process(pid);
    wait_until(|| executor.scheduler().process_count() == 0, "teardown");
    channel.unregister_holder(token);
    executor.shutdown();
}
