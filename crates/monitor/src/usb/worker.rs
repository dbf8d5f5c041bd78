//! Hotplug worker thread
//!
//! Dedicated thread that owns the libusb context. It runs the
//! `libusb_handle_events()` loop, turns queued hotplug notices into inventory
//! events and talks to the Tokio runtime over the worker bridge.

use crate::usb::device::{HotplugNotice, arrival_event, departure_event};
use async_channel::{Receiver, Sender, TrySendError, bounded};
use common::{WorkerCommand, WorkerEndpoint, WorkerEvent, WorkerStatus};
use inventory::{DeviceKey, DispatchCounters, DispatchOutcome, EventDispatcher, EventKind};
use rusb::{Context, Device, Hotplug, HotplugBuilder, Registration, UsbContext};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Notices the hotplug callback can queue before it starts dropping them
pub const NOTICE_QUEUE_CAPACITY: usize = 256;

/// How long one `handle_events` call may wait for USB activity
const EVENT_TIMEOUT: Duration = Duration::from_millis(100);

/// Hotplug worker
///
/// Holds the libusb context and the hotplug registration for as long as it
/// runs. Dropping it deregisters the callback.
pub struct HotplugWorker {
    /// Kept alive for the lifetime of the worker; dropped before the context
    _registration: Registration<Context>,
    context: Context,
    notices: Receiver<HotplugNotice>,
    dispatcher: Arc<EventDispatcher>,
    status: WorkerStatus,
}

impl HotplugWorker {
    /// Create the libusb context and register the hotplug callback
    ///
    /// Devices already attached are reported through the callback as
    /// arrivals, so they are queued by the time this returns.
    pub fn new(dispatcher: Arc<EventDispatcher>) -> Result<Self, rusb::Error> {
        if !rusb::has_hotplug() {
            return Err(rusb::Error::NotSupported);
        }

        let context = Context::new()?;
        let (notice_tx, notices) = bounded(NOTICE_QUEUE_CAPACITY);
        let callback = HotplugCallback::new(notice_tx, Arc::clone(dispatcher.counters()));

        let registration = HotplugBuilder::new()
            .enumerate(true)
            .register(&context, Box::new(callback))?;

        debug!("Hot-plug callback registered");

        Ok(Self {
            _registration: registration,
            context,
            notices,
            dispatcher,
            status: WorkerStatus::default(),
        })
    }

    /// Notices waiting to be dispatched
    pub fn queued_notices(&self) -> usize {
        self.notices.len()
    }

    /// Run the worker event loop until a Shutdown command arrives
    ///
    /// Each iteration:
    /// 1. Answers pending commands from Tokio (non-blocking)
    /// 2. Lets libusb process events (with timeout), which fires callbacks
    /// 3. Dispatches every queued notice in arrival order
    /// 4. Replays events deferred by a busy inventory lock
    pub fn run(mut self, endpoint: &WorkerEndpoint) {
        info!("Hotplug worker started");

        'outer: loop {
            self.status.ticks += 1;

            while let Some(cmd) = endpoint.try_recv_command() {
                match cmd {
                    WorkerCommand::Shutdown => {
                        info!("Hotplug worker shutting down");
                        break 'outer;
                    }
                    WorkerCommand::Status { response } => {
                        self.status.pending_deferred = self.dispatcher.pending_deferred();
                        let _ = response.send(self.status);
                    }
                }
            }

            match self.context.handle_events(Some(EVENT_TIMEOUT)) {
                Ok(()) => {}
                Err(rusb::Error::Interrupted) => {
                    debug!("USB event handling interrupted");
                }
                Err(e) => {
                    warn!("Error handling USB events: {}", e);
                    std::thread::sleep(EVENT_TIMEOUT);
                }
            }

            while let Ok(notice) = self.notices.try_recv() {
                self.status.notices += 1;
                self.handle_notice(notice, endpoint);
            }

            let replayed = self.dispatcher.retry_deferred();
            if replayed > 0 {
                debug!("Replayed {} deferred events", replayed);
            }
        }

        info!("Hotplug worker stopped");
    }

    /// Dispatch one notice
    fn handle_notice(&self, notice: HotplugNotice, endpoint: &WorkerEndpoint) {
        // Wrap in catch_unwind to prevent panics from killing the worker
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.handle_notice_inner(notice)
        }));

        match result {
            Ok((kind, key, outcome)) => {
                endpoint.publish(WorkerEvent::Dispatched { kind, key, outcome });
            }
            Err(e) => error!("Panic in hotplug notice handler: {:?}", e),
        }
    }

    fn handle_notice_inner(
        &self,
        notice: HotplugNotice,
    ) -> (EventKind, Option<DeviceKey>, DispatchOutcome) {
        let raw = match &notice {
            HotplugNotice::Arrived { device, descriptor } => {
                arrival_event(device, descriptor.as_ref())
            }
            HotplugNotice::Left { bus, address } => departure_event(*bus, *address),
        };

        let kind = raw.kind;
        let key = raw.key();
        let outcome = self.dispatcher.dispatch(raw);
        debug!("Hotplug {:?} {:?}: {:?}", kind, key, outcome);
        (kind, key, outcome)
    }
}

/// Hot-plug callback handler
///
/// Runs inside `libusb_handle_events`. It never blocks: a full notice queue
/// drops the notice and counts it as a source overflow.
struct HotplugCallback {
    notices: Sender<HotplugNotice>,
    counters: Arc<DispatchCounters>,
}

impl HotplugCallback {
    fn new(notices: Sender<HotplugNotice>, counters: Arc<DispatchCounters>) -> Self {
        Self { notices, counters }
    }

    fn enqueue(&self, notice: HotplugNotice) {
        match self.notices.try_send(notice) {
            Ok(()) => {}
            Err(TrySendError::Full(notice)) => {
                self.counters.record_source_overflow();
                warn!("Hotplug notice queue full, dropping {:?}", notice.kind());
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

impl Hotplug<Context> for HotplugCallback {
    fn device_arrived(&mut self, device: Device<Context>) {
        debug!(
            "Hot-plug callback: device arrived (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
        self.enqueue(HotplugNotice::arrived(device));
    }

    fn device_left(&mut self, device: Device<Context>) {
        debug!(
            "Hot-plug callback: device left (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
        self.enqueue(HotplugNotice::left(&device));
    }
}

/// Spawn the hotplug worker thread
///
/// The worker reports `Ready` or `Failed` on the bridge before doing
/// anything else, and `Stopped` when its loop exits.
pub fn spawn_hotplug_worker(
    endpoint: WorkerEndpoint,
    dispatcher: Arc<EventDispatcher>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("usb-hotplug".to_string())
        .spawn(move || {
            let worker = match HotplugWorker::new(dispatcher) {
                Ok(worker) => worker,
                Err(e) => {
                    let reason = match e {
                        rusb::Error::NotSupported => {
                            "libusb hotplug support unavailable".to_string()
                        }
                        other => format!("Failed to register hotplug callback: {}", other),
                    };
                    error!("{}", reason);
                    let _ = endpoint.send_event(WorkerEvent::Failed { reason });
                    return;
                }
            };

            let devices = worker.queued_notices();
            if endpoint.send_event(WorkerEvent::Ready { devices }).is_err() {
                warn!("Worker bridge closed before startup completed");
                return;
            }

            worker.run(&endpoint);
            announce_stopped(&endpoint);
        })
}

/// Tell the bridge the worker loop has exited
///
/// Never waits: with nobody draining events the queue may be full, and the
/// thread must still exit so it can be joined.
fn announce_stopped(endpoint: &WorkerEndpoint) {
    if !endpoint.publish(WorkerEvent::Stopped) {
        debug!("Worker event queue full or closed, Stopped not delivered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{BRIDGE_CAPACITY, create_worker_bridge};
    use inventory::{AdmissionFilter, InventoryStore, OverflowPolicy};
    use std::sync::mpsc;

    fn dispatcher() -> Arc<EventDispatcher> {
        let store = Arc::new(InventoryStore::new(16, OverflowPolicy::RejectNewest).unwrap());
        Arc::new(EventDispatcher::new(store, AdmissionFilter::AllowAll))
    }

    #[test]
    fn test_hotplug_worker_creation() {
        // Creation may fail without USB access or hotplug support
        match HotplugWorker::new(dispatcher()) {
            Ok(worker) => {
                assert!(worker.queued_notices() <= NOTICE_QUEUE_CAPACITY);
            }
            Err(e) => {
                eprintln!(
                    "Hotplug worker creation failed (expected without USB access): {}",
                    e
                );
            }
        }
    }

    #[test]
    fn test_full_notice_queue_counts_overflow() {
        let dispatcher = dispatcher();
        let (tx, _rx) = bounded(1);
        let callback = HotplugCallback::new(tx, Arc::clone(dispatcher.counters()));

        callback.enqueue(HotplugNotice::Left { bus: 1, address: 2 });
        callback.enqueue(HotplugNotice::Left { bus: 1, address: 3 });

        assert_eq!(dispatcher.stats().source_overflow, 1);
    }

    #[test]
    fn test_stop_announcement_never_blocks_on_full_bridge() {
        let (bridge, endpoint) = create_worker_bridge();
        for _ in 0..BRIDGE_CAPACITY {
            assert!(endpoint.publish(WorkerEvent::Stopped));
        }

        let (done_tx, done_rx) = mpsc::channel();
        let handle = std::thread::spawn(move || {
            announce_stopped(&endpoint);
            let _ = done_tx.send(());
        });

        assert!(
            done_rx.recv_timeout(Duration::from_secs(5)).is_ok(),
            "worker exit blocked on a full event queue"
        );
        handle.join().unwrap();

        // The queued events are untouched and the bridge stays open
        assert!(matches!(
            bridge.recv_event_blocking(),
            Ok(WorkerEvent::Stopped)
        ));
    }
}
