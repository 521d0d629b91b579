//! The flow-controlled channel, the core's dominant process resource.
//!
//! A channel is a one-way data flow with at most one receiver (a process or
//! a callback) and any number of senders, plus control listeners and opaque
//! holder tokens that keep it alive. Flow control starts blocked so setup
//! can finish before data moves; closing is terminal.
//!
//! Ownership is shared: channels are only handed out as `Arc`. Disposal is
//! driven by an explicit endpoint count (receiver + senders + listeners +
//! holders); when a configuration change leaves zero endpoints the channel
//! marks itself destructed, exactly once. Listeners and peer flow messages
//! are notified from a snapshot taken under the lock and invoked outside
//! it, so a listener can freely call back into the channel.

use parking_lot::Mutex;
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::channels::item::{ChannelItem, ChannelKind, ClientMessage, TextLine};
use crate::channels::receiver::{ChannelControlListener, ChannelReceiver};
use crate::executor::message::{FlowStatus, ProcessMessage};
use crate::executor::resource::ProcessResource;
use crate::executor::scheduler::Scheduler;
use crate::types::{Pid, Rid};

/// Opaque cookie identifying one registered holder of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HolderToken(u64);

enum ReceiverEnd<T: ChannelItem> {
    None,
    Process(Pid, Rid),
    Callback(Arc<dyn ChannelReceiver<T>>),
}

impl<T: ChannelItem> ReceiverEnd<T> {
    fn is_present(&self) -> bool {
        !matches!(self, ReceiverEnd::None)
    }
}

struct ChannelState<T: ChannelItem> {
    receiver: ReceiverEnd<T>,
    senders: SmallVec<[(Pid, Rid); 2]>,
    listeners: Vec<Arc<dyn ChannelControlListener>>,
    holders: SmallVec<[u64; 2]>,
    next_holder: u64,
    /// Items left before auto-block; meaningless while `unlimited`.
    items_remaining: u32,
    unlimited: bool,
    blocked: bool,
    closed: bool,
    destructed: bool,
    /// Broadcasts currently in flight; disposal waits for them.
    broadcasts_active: u32,
    /// The next resource add from this PID attaches the receiver end.
    next_add_receiver: Option<Pid>,
    /// Last status sent out, to suppress duplicate notifications.
    last_status: FlowStatus,
}

impl<T: ChannelItem> ChannelState<T> {
    fn endpoint_refs(&self) -> usize {
        usize::from(self.receiver.is_present())
            + self.senders.len()
            + self.listeners.len()
            + self.holders.len()
    }
}

/// Snapshot taken under the lock, dispatched outside it.
struct BroadcastPlan {
    status: FlowStatus,
    listeners: Vec<Arc<dyn ChannelControlListener>>,
    receiver: Option<(Pid, Rid)>,
    senders: SmallVec<[(Pid, Rid); 2]>,
}

enum Route<T: ChannelItem> {
    Process(Pid, Rid),
    Callback(Arc<dyn ChannelReceiver<T>>),
    Void,
}

/// A typed, flow-controlled, shared-ownership channel.
pub struct Channel<T: ChannelItem> {
    name: String,
    subtype: Option<String>,
    scheduler: Arc<Scheduler>,
    state: Mutex<ChannelState<T>>,
}

/// Text channel: a stream of formatted lines, both session output and user
/// input.
pub type TextChannel = Channel<TextLine>;

/// Client data channel: structured data to or from an enhanced client.
pub type ClientDataChannel = Channel<ClientMessage>;

impl<T: ChannelItem> Channel<T> {
    /// Creates a channel in the blocked state so endpoints can be wired
    /// before data flows.
    pub fn new(
        name: impl Into<String>,
        subtype: Option<String>,
        scheduler: Arc<Scheduler>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            subtype,
            scheduler,
            state: Mutex::new(ChannelState {
                receiver: ReceiverEnd::None,
                senders: SmallVec::new(),
                listeners: Vec::new(),
                holders: SmallVec::new(),
                next_holder: 1,
                items_remaining: 0,
                unlimited: true,
                blocked: true,
                closed: false,
                destructed: false,
                broadcasts_active: 0,
                next_add_receiver: None,
                last_status: FlowStatus::Blocked,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subtype(&self) -> Option<&str> {
        self.subtype.as_deref()
    }

    pub fn kind(&self) -> ChannelKind {
        T::KIND
    }

    pub fn is_blocked(&self) -> bool {
        self.state.lock().blocked
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn is_destructed(&self) -> bool {
        self.state.lock().destructed
    }

    /// The last broadcast flow status.
    pub fn flow_status(&self) -> FlowStatus {
        self.state.lock().last_status
    }

    /// Current endpoint reference count; diagnostic hook.
    pub fn endpoint_refs(&self) -> usize {
        self.state.lock().endpoint_refs()
    }

    /// Upcast for registration with process services.
    pub fn as_resource(self: &Arc<Self>) -> Arc<dyn ProcessResource> {
        self.clone()
    }

    /// Declares that the next resource add from `pid` attaches the
    /// receiver end; every other add attaches a sender.
    pub fn mark_next_add_receiver(&self, pid: Pid) {
        self.state.lock().next_add_receiver = Some(pid);
    }

    /// Temporarily blocks the channel. No-op when already blocked or
    /// closed.
    pub fn block(&self) {
        let plan = {
            let mut st = self.state.lock();
            if st.closed || st.destructed {
                return;
            }
            st.blocked = true;
            Self::plan_status(&mut st)
        };
        self.run_broadcast(plan);
    }

    /// Unblocks the channel with a fresh credit of `allowed_items`
    /// sendable items; zero means unlimited. May be called while already
    /// unblocked to change the credit. Fails once closed.
    pub fn unblock(&self, allowed_items: u32) -> bool {
        let plan = {
            let mut st = self.state.lock();
            if st.closed || st.destructed {
                return false;
            }
            st.blocked = false;
            st.items_remaining = allowed_items;
            st.unlimited = allowed_items == 0;
            Self::plan_status(&mut st)
        };
        self.run_broadcast(plan);
        true
    }

    /// Closes the channel permanently. Peers and listeners are notified
    /// once.
    pub fn close(&self) {
        let plan = {
            let mut st = self.state.lock();
            if st.destructed {
                return;
            }
            st.closed = true;
            Self::plan_status(&mut st)
        };
        self.run_broadcast(plan);
        self.check_dispose();
    }

    /// Sends one item. On flow rejection (blocked or closed) the item is
    /// returned so the caller can retry; once accepted the item is
    /// committed even if the receiver has meanwhile gone away.
    pub fn send(&self, item: T) -> Result<(), T> {
        let (route, plan) = {
            let mut st = self.state.lock();

            if st.destructed || st.last_status != FlowStatus::Open {
                return Err(item);
            }

            let mut plan = None;
            if !st.unlimited {
                debug_assert!(st.items_remaining > 0);
                st.items_remaining -= 1;
                if st.items_remaining == 0 {
                    // Credit spent: auto-block.
                    st.blocked = true;
                    plan = Self::plan_status(&mut st);
                }
            }

            let route = match &st.receiver {
                ReceiverEnd::Process(pid, rid) => Route::Process(*pid, *rid),
                ReceiverEnd::Callback(callback) => Route::Callback(callback.clone()),
                ReceiverEnd::None => Route::Void,
            };
            (route, plan)
        };

        self.run_broadcast(plan);

        match route {
            Route::Process(pid, rid) => {
                if !self
                    .scheduler
                    .send_message_from(pid, rid, item.into_message(&self.name))
                {
                    debug!(channel = %self.name, %pid, "receiver could not take item");
                }
            }
            Route::Callback(callback) => callback.item_received(&self.name, item),
            Route::Void => {
                debug!(channel = %self.name, "no receiver attached; item dropped");
            }
        }
        Ok(())
    }

    /// Registers a callback receiver. Fails when a receiver (callback or
    /// process) is already attached.
    pub fn register_receiver_callback(&self, callback: Arc<dyn ChannelReceiver<T>>) -> bool {
        let mut st = self.state.lock();
        if st.destructed || st.receiver.is_present() {
            return false;
        }
        st.receiver = ReceiverEnd::Callback(callback);
        true
    }

    /// Unregisters the callback receiver and closes the channel.
    pub fn unregister_receiver_callback(&self, callback: &Arc<dyn ChannelReceiver<T>>) {
        let plan = {
            let mut st = self.state.lock();
            match &st.receiver {
                ReceiverEnd::Callback(existing) if Arc::ptr_eq(existing, callback) => {
                    st.receiver = ReceiverEnd::None;
                    st.closed = true;
                    Self::plan_status(&mut st)
                }
                _ => return,
            }
        };
        self.run_broadcast(plan);
        self.check_dispose();
    }

    /// Registers a control listener. Registering the same listener twice is
    /// a no-op.
    pub fn register_control_listener(&self, listener: Arc<dyn ChannelControlListener>) -> bool {
        let mut st = self.state.lock();
        if st.destructed {
            return false;
        }
        if !st.listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            st.listeners.push(listener);
        }
        true
    }

    /// Unregisters a control listener; may trigger disposal.
    pub fn unregister_control_listener(&self, listener: &Arc<dyn ChannelControlListener>) {
        {
            let mut st = self.state.lock();
            st.listeners.retain(|l| !Arc::ptr_eq(l, listener));
        }
        self.check_dispose();
    }

    /// Registers an opaque holder that keeps the channel alive without
    /// listening.
    pub fn register_holder(&self) -> HolderToken {
        let mut st = self.state.lock();
        let id = st.next_holder;
        st.next_holder += 1;
        st.holders.push(id);
        HolderToken(id)
    }

    /// Releases a holder token; may trigger disposal.
    pub fn unregister_holder(&self, token: HolderToken) {
        {
            let mut st = self.state.lock();
            if let Some(index) = st.holders.iter().position(|h| *h == token.0) {
                st.holders.remove(index);
            }
        }
        self.check_dispose();
    }

    /// Re-evaluates the effective flow status; on a distinct transition,
    /// snapshots the notification targets. Caller dispatches the plan
    /// after unlocking.
    fn plan_status(st: &mut ChannelState<T>) -> Option<BroadcastPlan> {
        if st.destructed {
            return None;
        }

        if !st.unlimited && st.items_remaining == 0 {
            st.blocked = true;
        }

        let status = if st.closed {
            FlowStatus::Closed
        } else if st.blocked {
            FlowStatus::Blocked
        } else {
            FlowStatus::Open
        };

        if status == st.last_status {
            return None;
        }
        st.last_status = status;
        st.broadcasts_active += 1;

        let receiver = match &st.receiver {
            ReceiverEnd::Process(pid, rid) => Some((*pid, *rid)),
            _ => None,
        };

        Some(BroadcastPlan {
            status,
            listeners: st.listeners.clone(),
            receiver,
            senders: st.senders.clone(),
        })
    }

    /// Delivers a status transition to every listener and peer, then
    /// re-checks disposal deferred by the in-flight broadcast.
    fn run_broadcast(&self, plan: Option<BroadcastPlan>) {
        let Some(plan) = plan else {
            return;
        };

        debug!(
            channel = %self.name,
            status = ?plan.status,
            "channel flow status changed"
        );

        for listener in &plan.listeners {
            match plan.status {
                FlowStatus::Open => listener.flow_open(&self.name),
                FlowStatus::Blocked => listener.flow_blocked(&self.name),
                FlowStatus::Closed => listener.flow_closed(&self.name),
                FlowStatus::Destructed => listener.destructed(&self.name),
            }
        }

        let flow_message = |name: &str| ProcessMessage::ChannelFlow {
            channel: name.to_string(),
            status: plan.status,
        };

        if let Some((pid, rid)) = plan.receiver {
            if !self
                .scheduler
                .send_message_from(pid, rid, flow_message(&self.name))
            {
                debug!(channel = %self.name, %pid, "could not notify receiver of status");
            }
        }

        for (pid, rid) in &plan.senders {
            if !self
                .scheduler
                .send_message_from(*pid, *rid, flow_message(&self.name))
            {
                debug!(channel = %self.name, %pid, "could not notify sender of status");
            }
        }

        {
            let mut st = self.state.lock();
            st.broadcasts_active -= 1;
        }
        self.check_dispose();
    }

    /// Destructs the channel when the last endpoint is gone and no
    /// broadcast is in flight. Idempotent.
    fn check_dispose(&self) {
        let newly_destructed = {
            let mut st = self.state.lock();
            if !st.destructed && st.broadcasts_active == 0 && st.endpoint_refs() == 0 {
                st.destructed = true;
                st.closed = true;
                st.last_status = FlowStatus::Destructed;
                true
            } else {
                false
            }
        };

        if newly_destructed {
            debug!(channel = %self.name, "channel destructed, last endpoint gone");
        }
    }
}

impl<T: ChannelItem> ProcessResource for Channel<T> {
    fn added_to_process(&self, process_id: Pid, resource_id: Rid) -> bool {
        let mut st = self.state.lock();
        if st.destructed {
            return false;
        }

        if st.next_add_receiver == Some(process_id) {
            // Only one receiver, and never alongside a callback.
            match st.receiver {
                ReceiverEnd::None => {
                    st.receiver = ReceiverEnd::Process(process_id, resource_id);
                    st.next_add_receiver = None;
                    true
                }
                ReceiverEnd::Process(pid, rid) => pid == process_id && rid == resource_id,
                ReceiverEnd::Callback(_) => false,
            }
        } else {
            // A sender or other interested peer.
            if !st.senders.contains(&(process_id, resource_id)) {
                st.senders.push((process_id, resource_id));
            }
            true
        }
    }

    fn removed_from_process(&self, process_id: Pid, resource_id: Rid, _process_cleanup: bool) {
        let plan = {
            let mut st = self.state.lock();
            let mut removed = false;

            if matches!(
                st.receiver,
                ReceiverEnd::Process(pid, rid) if pid == process_id && rid == resource_id
            ) {
                st.receiver = ReceiverEnd::None;
                removed = true;
            } else if let Some(index) = st
                .senders
                .iter()
                .position(|entry| *entry == (process_id, resource_id))
            {
                st.senders.remove(index);
                removed = true;
            }

            if removed {
                // Losing a legitimate endpoint closes the channel.
                st.closed = true;
                Self::plan_status(&mut st)
            } else {
                None
            }
        };
        self.run_broadcast(plan);
        self.check_dispose();
    }
}

impl<T: ChannelItem> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.state.lock();
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("kind", &T::KIND)
            .field("status", &st.last_status)
            .field("refs", &st.endpoint_refs())
            .finish_non_exhaustive()
    }
}
