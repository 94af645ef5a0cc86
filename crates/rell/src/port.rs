//! The device/port hook table.
//!
//! External I/O stays behind a vtable of command handlers. A request is a
//! managed heap node carrying the device command, a byte payload, and two
//! node-id side slots: `link` chains a queued request to the one ahead of
//! it on the device's pending list, `misc` is free for driver bookkeeping;
//! the GC marks through both. Synchronous commands return a result
//! immediately; asynchronous commands queue and complete when the
//! scheduler polls the device. Every completion (or fault) emits an
//! [`Event`] value, drained by the host through the session.
//!
//! A RAM-file driver ships as the in-tree collaborator used by tests.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::{
    error::{ErrorId, RunError, RunResult},
    heap::{Heap, HeapData, HeapId},
    value::{Event, EventType},
};

/// Commands a driver must handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case")]
pub enum DeviceCommand {
    Init,
    Open,
    Close,
    Read,
    Write,
    Query,
    Create,
    Delete,
    Rename,
    Poll,
    Quit,
}

/// State of a request in the device pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestState {
    /// Submitted, not yet taken by the driver.
    Pending,
    /// Completed with a byte result.
    Done(Vec<u8>),
    /// Completed with a driver error message.
    Failed(String),
}

/// A device request node.
#[derive(Debug, Serialize, Deserialize)]
pub struct Request {
    pub device: u32,
    pub command: DeviceCommand,
    /// Target resource (a path for file-like drivers).
    pub target: String,
    pub payload: Vec<u8>,
    pub state: RequestState,
    /// The request ahead of this one on the pending list, set when the
    /// request queues. Marked by the GC, so a rooted tail keeps the whole
    /// chain alive.
    pub link: Option<HeapId>,
    /// Free side slot for driver bookkeeping, also marked by the GC.
    pub misc: Option<HeapId>,
}

/// One port driver: the command vtable.
pub trait PortDriver {
    fn name(&self) -> &'static str;

    /// Handles one command synchronously. Returns `Ok(Some(bytes))` for an
    /// immediate result, `Ok(None)` to queue the request for polling.
    fn command(&mut self, command: DeviceCommand, target: &str, payload: &[u8]) -> RunResult<Option<Vec<u8>>>;

    /// Polls pending work; returns true when something completed.
    fn poll(&mut self) -> bool {
        false
    }
}

/// The registered drivers, the pending request queue, and the completion
/// events not yet drained by the host.
#[derive(Default)]
pub struct DeviceTable {
    drivers: Vec<Box<dyn PortDriver>>,
    pending: Vec<HeapId>,
    events: Vec<Event>,
}

impl std::fmt::Debug for DeviceTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceTable")
            .field("drivers", &self.drivers.len())
            .field("pending", &self.pending.len())
            .field("events", &self.events.len())
            .finish()
    }
}

/// The event a finished command reports. The code is the request's node
/// index; the data is the result's byte length.
fn completion_event(command: DeviceCommand, request: HeapId, result_len: usize) -> Event {
    let etype = match command {
        DeviceCommand::Read | DeviceCommand::Query => EventType::Read,
        DeviceCommand::Write | DeviceCommand::Create | DeviceCommand::Rename => EventType::Wrote,
        DeviceCommand::Open | DeviceCommand::Init => EventType::Opened,
        DeviceCommand::Close | DeviceCommand::Delete | DeviceCommand::Quit => EventType::Closed,
        DeviceCommand::Poll => EventType::Custom,
    };
    Event {
        etype,
        code: request.index() as u32,
        data: result_len as i64,
    }
}

fn fault_event(request: HeapId) -> Event {
    Event {
        etype: EventType::Error,
        code: request.index() as u32,
        data: 0,
    }
}

impl DeviceTable {
    /// Registers a driver, returning its device id.
    pub fn register(&mut self, driver: Box<dyn PortDriver>) -> u32 {
        self.drivers.push(driver);
        (self.drivers.len() - 1) as u32
    }

    #[must_use]
    pub fn device_named(&self, name: &str) -> Option<u32> {
        self.drivers.iter().position(|d| d.name() == name).map(|pos| pos as u32)
    }

    /// Submits a request node. Synchronous completions update the node in
    /// place and emit a completion event; asynchronous ones link behind
    /// the current pending tail and join the queue.
    pub fn submit(&mut self, heap: &mut Heap, request: HeapId) -> RunResult<()> {
        let (device, command, target, payload) = {
            let req = heap.request(request);
            (req.device, req.command, req.target.clone(), req.payload.clone())
        };
        let driver = self
            .drivers
            .get_mut(device as usize)
            .ok_or_else(|| RunError::fail(ErrorId::PortFault, format!("no device {device}")))?;
        match driver.command(command, &target, &payload) {
            Ok(Some(bytes)) => {
                self.events.push(completion_event(command, request, bytes.len()));
                heap.request_mut(request).state = RequestState::Done(bytes);
            }
            Ok(None) => {
                heap.request_mut(request).link = self.pending.last().copied();
                self.pending.push(request);
            }
            Err(err) => {
                let message = match &err {
                    RunError::Fail(data) => data.message.clone(),
                    _ => "driver fault".to_owned(),
                };
                self.events.push(fault_event(request));
                heap.request_mut(request).state = RequestState::Failed(message);
                return Err(err);
            }
        }
        Ok(())
    }

    /// Polls every driver with queued work, retiring completed requests.
    /// Returns how many requests completed.
    pub fn poll_all(&mut self, heap: &mut Heap) -> usize {
        let mut completed = 0;
        let mut still_pending = Vec::new();
        for request in std::mem::take(&mut self.pending) {
            let device = heap.request(request).device;
            let done = self
                .drivers
                .get_mut(device as usize)
                .is_some_and(|driver| driver.poll());
            if done {
                // The driver re-runs the command now that it is ready.
                let (command, target, payload) = {
                    let req = heap.request(request);
                    (req.command, req.target.clone(), req.payload.clone())
                };
                let driver = self.drivers.get_mut(device as usize).expect("device checked");
                match driver.command(command, &target, &payload) {
                    Ok(Some(bytes)) => {
                        self.events.push(completion_event(command, request, bytes.len()));
                        heap.request_mut(request).state = RequestState::Done(bytes);
                    }
                    Ok(None) => {
                        still_pending.push(request);
                        continue;
                    }
                    Err(_) => {
                        self.events.push(fault_event(request));
                        heap.request_mut(request).state = RequestState::Failed("driver fault".to_owned());
                    }
                }
                completed += 1;
            } else {
                still_pending.push(request);
            }
        }
        self.pending = still_pending;
        completed
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Drains the completion events accumulated since the last drain.
    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }
}

/// Allocates a request node.
pub fn make_request(
    heap: &mut Heap,
    device: u32,
    command: DeviceCommand,
    target: &str,
    payload: Vec<u8>,
) -> RunResult<HeapId> {
    Ok(heap.alloc(HeapData::Request(Request {
        device,
        command,
        target: target.to_owned(),
        payload,
        state: RequestState::Pending,
        link: None,
        misc: None,
    }))?)
}

/// In-memory file driver: the reference collaborator.
#[derive(Debug, Default)]
pub struct RamFileDriver {
    files: AHashMap<String, Vec<u8>>,
    /// When positive, reads defer this many polls before completing.
    pub read_latency: u32,
}

impl PortDriver for RamFileDriver {
    fn name(&self) -> &'static str {
        "ram-file"
    }

    fn command(&mut self, command: DeviceCommand, target: &str, payload: &[u8]) -> RunResult<Option<Vec<u8>>> {
        match command {
            DeviceCommand::Init | DeviceCommand::Open | DeviceCommand::Close | DeviceCommand::Quit => {
                Ok(Some(Vec::new()))
            }
            DeviceCommand::Write => {
                self.files.insert(target.to_owned(), payload.to_vec());
                Ok(Some(Vec::new()))
            }
            DeviceCommand::Read => {
                if self.read_latency > 0 {
                    self.read_latency -= 1;
                    return Ok(None);
                }
                self.files
                    .get(target)
                    .cloned()
                    .map(Some)
                    .ok_or_else(|| RunError::fail(ErrorId::PortFault, format!("{target} does not exist")))
            }
            DeviceCommand::Query => Ok(Some(
                self.files
                    .get(target)
                    .map(|data| data.len().to_string().into_bytes())
                    .unwrap_or_default(),
            )),
            DeviceCommand::Create => {
                self.files.entry(target.to_owned()).or_default();
                Ok(Some(Vec::new()))
            }
            DeviceCommand::Delete => {
                self.files.remove(target);
                Ok(Some(Vec::new()))
            }
            DeviceCommand::Rename => {
                let new_name = String::from_utf8_lossy(payload).into_owned();
                if let Some(data) = self.files.remove(target) {
                    self.files.insert(new_name, data);
                }
                Ok(Some(Vec::new()))
            }
            DeviceCommand::Poll => Ok(Some(Vec::new())),
        }
    }

    fn poll(&mut self) -> bool {
        self.read_latency == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Tracker;

    #[test]
    fn sync_write_then_read() {
        let mut heap = Heap::new(Tracker::NoLimit);
        let mut table = DeviceTable::default();
        let dev = table.register(Box::new(RamFileDriver::default()));

        let w = make_request(&mut heap, dev, DeviceCommand::Write, "a.txt", b"hello".to_vec()).unwrap();
        table.submit(&mut heap, w).unwrap();
        assert_eq!(heap.request(w).state, RequestState::Done(Vec::new()));

        let r = make_request(&mut heap, dev, DeviceCommand::Read, "a.txt", Vec::new()).unwrap();
        table.submit(&mut heap, r).unwrap();
        assert_eq!(heap.request(r).state, RequestState::Done(b"hello".to_vec()));
    }

    #[test]
    fn async_read_completes_on_poll() {
        let mut heap = Heap::new(Tracker::NoLimit);
        let mut table = DeviceTable::default();
        let mut driver = RamFileDriver::default();
        driver.files.insert("slow.txt".to_owned(), b"later".to_vec());
        driver.read_latency = 1;
        let dev = table.register(Box::new(driver));

        let r = make_request(&mut heap, dev, DeviceCommand::Read, "slow.txt", Vec::new()).unwrap();
        table.submit(&mut heap, r).unwrap();
        assert_eq!(heap.request(r).state, RequestState::Pending);
        assert_eq!(table.pending_count(), 1);

        let completed = table.poll_all(&mut heap);
        assert_eq!(completed, 1);
        assert_eq!(heap.request(r).state, RequestState::Done(b"later".to_vec()));
        assert_eq!(table.pending_count(), 0);
    }

    #[test]
    fn missing_file_faults() {
        let mut heap = Heap::new(Tracker::NoLimit);
        let mut table = DeviceTable::default();
        let dev = table.register(Box::new(RamFileDriver::default()));
        let r = make_request(&mut heap, dev, DeviceCommand::Read, "nope", Vec::new()).unwrap();
        assert!(table.submit(&mut heap, r).is_err());
        assert!(matches!(heap.request(r).state, RequestState::Failed(_)));
        let events = table.take_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].etype, EventType::Error, "faults report as error events");
    }

    #[test]
    fn completions_emit_events() {
        let mut heap = Heap::new(Tracker::NoLimit);
        let mut table = DeviceTable::default();
        let dev = table.register(Box::new(RamFileDriver::default()));

        let w = make_request(&mut heap, dev, DeviceCommand::Write, "e.txt", b"abc".to_vec()).unwrap();
        table.submit(&mut heap, w).unwrap();
        let r = make_request(&mut heap, dev, DeviceCommand::Read, "e.txt", Vec::new()).unwrap();
        table.submit(&mut heap, r).unwrap();

        let events = table.take_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].etype, EventType::Wrote);
        assert_eq!(events[0].code, w.index() as u32);
        assert_eq!(events[1].etype, EventType::Read);
        assert_eq!(events[1].data, 3, "read event carries the result length");
        assert!(table.take_events().is_empty(), "draining empties the queue");
    }

    #[test]
    fn pending_requests_chain_through_link() {
        let mut heap = Heap::new(Tracker::NoLimit);
        let mut table = DeviceTable::default();
        let mut driver = RamFileDriver::default();
        driver.files.insert("slow.txt".to_owned(), b"x".to_vec());
        driver.read_latency = 2;
        let dev = table.register(Box::new(driver));

        let first = make_request(&mut heap, dev, DeviceCommand::Read, "slow.txt", Vec::new()).unwrap();
        table.submit(&mut heap, first).unwrap();
        let second = make_request(&mut heap, dev, DeviceCommand::Read, "slow.txt", Vec::new()).unwrap();
        table.submit(&mut heap, second).unwrap();

        assert_eq!(heap.request(first).link, None, "queue head has nothing ahead of it");
        assert_eq!(heap.request(second).link, Some(first), "queued request links to the one ahead");
    }

    /// The GC walks the link side slot: a rooted tail keeps the request
    /// ahead of it alive even with no other references.
    #[test]
    fn linked_requests_stay_reachable() {
        let mut heap = Heap::new(Tracker::NoLimit);
        let ahead = make_request(&mut heap, 0, DeviceCommand::Read, "a", Vec::new()).unwrap();
        let tail = make_request(&mut heap, 0, DeviceCommand::Read, "b", Vec::new()).unwrap();
        heap.request_mut(tail).link = Some(ahead);

        heap.collect(&[], &[tail]);
        assert!(heap.is_live(ahead), "link chains are GC-reachable");

        heap.collect(&[], &[]);
        assert!(!heap.is_live(ahead), "unrooted chains are swept whole");
        assert!(!heap.is_live(tail));
    }

    /// The misc side slot is marked the same way.
    #[test]
    fn misc_slot_is_gc_reachable() {
        let mut heap = Heap::new(Tracker::NoLimit);
        let side = make_request(&mut heap, 0, DeviceCommand::Query, "meta", Vec::new()).unwrap();
        let owner = make_request(&mut heap, 0, DeviceCommand::Read, "data", Vec::new()).unwrap();
        heap.request_mut(owner).misc = Some(side);
        heap.collect(&[], &[owner]);
        assert!(heap.is_live(side), "misc slots are GC-reachable");
    }
}
