//! The public session: startup, evaluation entry points, handles, the
//! allocator surface, devices, and binary snapshots.
//!
//! A [`Session`] owns one interpreter instance. All entry points pass the
//! enter-api check (startup must have completed), collect print output for
//! the caller's writer, and convert internal exits to [`ErrorReport`]s at
//! this boundary: a raised error becomes a report, an uncaught throw
//! becomes a no-catch report, a quit resolves to its exit value.

use crate::{
    api::{self, ApiArg, Datum, Handle},
    bind::{Specifier, bind_source},
    error::{ErrorReport, RunError},
    eval::{Machine, quote_one},
    heap::{Heap, HeapData, HeapId, HeapStats},
    intern::Interner,
    io::PrintWriter,
    natives::install_lib,
    port::{DeviceCommand, DeviceTable, PortDriver, RequestState, make_request},
    resource::Tracker,
    series::{Array, Binary},
    value::{Event, Seq, SeqKind, Value},
};

/// A raw allocator buffer: the `malloc`-style surface. Always backed by a
/// real node, even at size zero, so free and repossess are total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawBuf(pub(crate) HeapId);

/// One interpreter instance with its device table.
#[derive(Debug)]
pub struct Session {
    machine: Machine,
    devices: DeviceTable,
    started: bool,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Starts a session with no resource limits (the REPL default).
    #[must_use]
    pub fn new() -> Self {
        Self::with_tracker(Tracker::NoLimit).expect("unlimited startup cannot hit a limit")
    }

    /// Starts a session under a resource tracker.
    pub fn with_tracker(tracker: Tracker) -> Result<Self, ErrorReport> {
        let mut heap = Heap::new(tracker);
        let mut interner = Interner::new();
        let (lib, user) = install_lib(&mut heap, &mut interner).map_err(|err| Self::report(&err))?;
        Ok(Self {
            machine: Machine::new(heap, interner, lib, user),
            devices: DeviceTable::default(),
            started: true,
        })
    }

    fn enter_api(&self) {
        assert!(self.started, "session entry point used before startup completed");
    }

    fn report(err: &RunError) -> ErrorReport {
        match err {
            RunError::Fail(data) => ErrorReport::from_data(data),
            RunError::Throw { .. } => ErrorReport::no_catch(),
            RunError::Halt => ErrorReport::halted(),
            RunError::Quit(_) => unreachable!("quit resolves to a value at the driver"),
        }
    }

    // --- evaluation --------------------------------------------------------

    /// Scans, binds, and evaluates source text, draining print output.
    pub fn execute(&mut self, code: &str, print: &mut impl PrintWriter) -> Result<Datum, ErrorReport> {
        self.enter_api();
        let result = self.eval_source(code, "user");
        let output = std::mem::take(&mut self.machine.output);
        if !output.is_empty() {
            print.write_out(&output);
        }
        result
    }

    fn eval_source(&mut self, code: &str, name: &str) -> Result<Datum, ErrorReport> {
        let block = crate::scan::scan_source(&mut self.machine.heap, &mut self.machine.interner, code, Some(name))
            .map_err(|err| Self::report(&err))?;
        let (user, lib) = (self.machine.user, self.machine.lib);
        bind_source(&mut self.machine.heap, &mut self.machine.interner, block, user, lib);
        self.eval_block_id(block)
    }

    fn eval_block_id(&mut self, block: HeapId) -> Result<Datum, ErrorReport> {
        let seq = Seq::new(SeqKind::Block, block);
        match self.machine.eval_seq(&seq, Specifier::NONE) {
            Ok(value) => Ok(api::value_to_datum(&self.machine.heap, &self.machine.interner, &value)),
            Err(RunError::Quit(value)) => Ok(api::value_to_datum(
                &self.machine.heap,
                &self.machine.interner,
                &value,
            )),
            Err(other) => Err(Self::report(&other)),
        }
    }

    /// Variadic evaluation: UTF-8 fragments are scanned and bound against
    /// the user context; cells splice inertly; eval-marked cells splice
    /// evaluatively.
    pub fn run(&mut self, args: &[ApiArg]) -> Result<Datum, ErrorReport> {
        self.enter_api();
        let block = self.materialize(args).map_err(|err| Self::report(&err))?;
        self.eval_block_id(block)
    }

    /// Like [`Session::run`], but a raised error comes back as an error
    /// value instead of unwinding out of the call.
    pub fn trap_run(&mut self, args: &[ApiArg]) -> Result<Datum, ErrorReport> {
        self.enter_api();
        let block = self.materialize(args).map_err(|err| Self::report(&err))?;
        let seq = Seq::new(SeqKind::Block, block);
        match self.machine.eval_seq(&seq, Specifier::NONE) {
            Ok(value) => Ok(api::value_to_datum(&self.machine.heap, &self.machine.interner, &value)),
            Err(RunError::Fail(data)) => Ok(Datum::Error {
                id: data.id.to_string(),
                message: data.message.clone(),
            }),
            Err(RunError::Quit(value)) => Ok(api::value_to_datum(
                &self.machine.heap,
                &self.machine.interner,
                &value,
            )),
            Err(other) => Err(Self::report(&other)),
        }
    }

    /// Evaluates and discards the result.
    pub fn elide_run(&mut self, args: &[ApiArg]) -> Result<(), ErrorReport> {
        self.run(args).map(|_| ())
    }

    /// Evaluates and reports conditional truth.
    pub fn did(&mut self, args: &[ApiArg]) -> Result<bool, ErrorReport> {
        self.run(args).map(|datum| datum.is_truthy())
    }

    /// Evaluates and reports conditional falsehood.
    pub fn not_run(&mut self, args: &[ApiArg]) -> Result<bool, ErrorReport> {
        self.did(args).map(|truth| !truth)
    }

    /// Evaluates and prints the formed result through the writer.
    pub fn print_run(&mut self, args: &[ApiArg], print: &mut impl PrintWriter) -> Result<(), ErrorReport> {
        let datum = self.run(args)?;
        let output = std::mem::take(&mut self.machine.output);
        if !output.is_empty() {
            print.write_out(&output);
        }
        let text = match &datum {
            Datum::Text(s) => s.clone(),
            other => format!("{other:?}"),
        };
        print.write_out(&text);
        print.write_out("\n");
        Ok(())
    }

    /// Builds one array from a variadic argument stream.
    fn materialize(&mut self, args: &[ApiArg]) -> crate::error::RunResult<HeapId> {
        let mut cells: Vec<Value> = Vec::new();
        for arg in args {
            match arg {
                ApiArg::Utf8(fragment) => {
                    let block =
                        crate::scan::scan_source(&mut self.machine.heap, &mut self.machine.interner, fragment, None)?;
                    let (user, lib) = (self.machine.user, self.machine.lib);
                    bind_source(&mut self.machine.heap, &mut self.machine.interner, block, user, lib);
                    cells.extend_from_slice(self.machine.heap.array(block).as_slice());
                }
                ApiArg::Cell(datum) => {
                    let value = api::datum_to_value(&mut self.machine.heap, &mut self.machine.interner, datum)?;
                    // One quote level keeps the splice inert through the
                    // evaluator; the step strips it back off.
                    cells.push(quote_one(&mut self.machine.heap, value)?);
                }
                ApiArg::Eval(datum) => {
                    let value = api::datum_to_value(&mut self.machine.heap, &mut self.machine.interner, datum)?;
                    cells.push(value);
                }
            }
        }
        Ok(self.machine.heap.alloc(HeapData::Array(Array::from_values(cells)))?)
    }

    /// Builds a user error value without raising it.
    #[must_use]
    pub fn make_error(&self, message: &str) -> Datum {
        Datum::Error {
            id: "user".to_owned(),
            message: message.to_owned(),
        }
    }

    /// Resolves an OS errno to its platform message as an error report.
    #[must_use]
    pub fn fail_os(&self, errno: i32) -> ErrorReport {
        let message = std::io::Error::from_raw_os_error(errno).to_string();
        ErrorReport {
            id: "port-fault".to_owned(),
            message,
            near: None,
            file: None,
            line: None,
        }
    }

    // --- handles -----------------------------------------------------------

    /// Wraps a host value in a handle owned by the current frame (or
    /// indefinite at top level).
    pub fn alloc_handle(&mut self, datum: &Datum) -> Result<Handle, ErrorReport> {
        self.enter_api();
        let value = api::datum_to_value(&mut self.machine.heap, &mut self.machine.interner, datum)
            .map_err(|err| Self::report(&err))?;
        api::alloc_handle(&mut self.machine, value).map_err(|err| Self::report(&err))
    }

    /// Reads a handle's value back out.
    #[must_use]
    pub fn handle_datum(&self, handle: Handle) -> Datum {
        self.enter_api();
        let value = api::handle_cell(&self.machine.heap, handle);
        api::value_to_datum(&self.machine.heap, &self.machine.interner, &value)
    }

    pub fn manage(&mut self, handle: Handle) {
        self.enter_api();
        api::manage_handle(&mut self.machine, handle);
    }

    pub fn unmanage(&mut self, handle: Handle) {
        self.enter_api();
        api::unmanage_handle(&mut self.machine, handle);
    }

    pub fn release(&mut self, handle: Handle) {
        self.enter_api();
        api::release_handle(&mut self.machine, handle);
    }

    // --- allocator ---------------------------------------------------------

    /// Allocates a raw buffer. Zero-sized requests still get a distinct
    /// node, so freeing and repossessing them is always legal.
    pub fn alloc_bytes(&mut self, size: usize) -> RawBuf {
        self.enter_api();
        let mut binary = Binary::from_bytes(vec![0; size]);
        binary.flags.dont_relocate = true;
        let id = self
            .machine
            .heap
            .alloc_unmanaged(HeapData::Binary(binary))
            .expect("allocator buffers bypass tracker limits only at NoLimit");
        RawBuf(id)
    }

    /// `realloc(None, n)` is `alloc(n)`; otherwise resizes in place.
    pub fn realloc_bytes(&mut self, buf: Option<RawBuf>, size: usize) -> RawBuf {
        self.enter_api();
        match buf {
            None => self.alloc_bytes(size),
            Some(buf) => {
                self.machine.heap.binary_mut(buf.0).resize(size);
                buf
            }
        }
    }

    /// `free(None)` is a no-op. Double frees are fatal.
    pub fn free_bytes(&mut self, buf: Option<RawBuf>) {
        self.enter_api();
        if let Some(buf) = buf {
            self.machine.heap.free(buf.0);
        }
    }

    #[must_use]
    pub fn buf_slice(&self, buf: RawBuf) -> &[u8] {
        self.machine.heap.binary(buf.0).as_slice()
    }

    pub fn buf_write(&mut self, buf: RawBuf, data: &[u8]) {
        let binary = self.machine.heap.binary_mut(buf.0);
        binary.resize(data.len());
        for (i, byte) in data.iter().enumerate() {
            binary.set(i, *byte);
        }
    }

    /// Converts an allocator buffer into a first-class binary value: the
    /// node is lifted into management, relocation re-enabled, and a handle
    /// to the binary returned.
    pub fn repossess(&mut self, buf: RawBuf) -> Result<Handle, ErrorReport> {
        self.enter_api();
        self.machine.heap.binary_mut(buf.0).flags.dont_relocate = false;
        self.machine.heap.manage(buf.0);
        let value = Value::Binary(crate::value::BinRef {
            series: buf.0,
            index: 0,
        });
        api::alloc_handle(&mut self.machine, value).map_err(|err| Self::report(&err))
    }

    // --- GC, stats, signals ------------------------------------------------

    pub fn collect_garbage(&mut self) -> usize {
        self.enter_api();
        self.machine.collect_garbage()
    }

    #[must_use]
    pub fn heap_stats(&self) -> HeapStats {
        self.machine.heap.stats()
    }

    #[must_use]
    pub fn symbol_count(&self) -> usize {
        self.machine.interner.symbol_count()
    }

    /// Requests a halt; the evaluator raises it at the next step boundary.
    pub fn request_halt(&mut self) {
        self.machine.halt_requested = true;
    }

    /// Names of the variables defined in the user context.
    #[must_use]
    pub fn list_variables(&self) -> Vec<String> {
        crate::context::context_keys(&self.machine.heap, self.machine.user)
            .iter()
            .filter(|key| !key.hidden)
            .map(|key| self.machine.interner.spelling(key.symbol).to_owned())
            .collect()
    }

    // --- devices -----------------------------------------------------------

    pub fn register_driver(&mut self, driver: Box<dyn PortDriver>) -> u32 {
        self.enter_api();
        self.devices.register(driver)
    }

    /// Submits one device request and reports its state.
    pub fn device_request(
        &mut self,
        device: u32,
        command: DeviceCommand,
        target: &str,
        payload: Vec<u8>,
    ) -> Result<RequestState, ErrorReport> {
        self.enter_api();
        let request = make_request(&mut self.machine.heap, device, command, target, payload)
            .map_err(|err| Self::report(&err))?;
        match self.devices.submit(&mut self.machine.heap, request) {
            Ok(()) => Ok(self.machine.heap.request(request).state.clone()),
            Err(err) => Err(Self::report(&err)),
        }
    }

    /// Polls all devices once; returns completed request count.
    pub fn poll_devices(&mut self) -> usize {
        self.enter_api();
        self.devices.poll_all(&mut self.machine.heap)
    }

    /// Drains the completion events devices have emitted since the last
    /// drain (one per finished or faulted request).
    pub fn take_device_events(&mut self) -> Vec<Event> {
        self.enter_api();
        self.devices.take_events()
    }

    // --- snapshots ---------------------------------------------------------

    /// Serializes the whole interpreter state (heap, interner, contexts,
    /// collected output) to a binary snapshot.
    pub fn dump(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(&self.machine)
    }

    /// Restores a session from a snapshot. Device drivers are not part of
    /// snapshots and must be re-registered.
    pub fn load(bytes: &[u8]) -> Result<Self, postcard::Error> {
        let machine: Machine = postcard::from_bytes(bytes)?;
        Ok(Self {
            machine,
            devices: DeviceTable::default(),
            started: true,
        })
    }

    /// Evaluates source and returns the molded rendering of its result.
    /// The REPL's read-eval-mold step.
    pub fn execute_molded(&mut self, code: &str, print: &mut impl PrintWriter) -> Result<String, ErrorReport> {
        self.enter_api();
        let datum = self.execute(&format!("mold do [{code}]"), print)?;
        match datum {
            Datum::Text(text) => Ok(text),
            other => Ok(format!("{other:?}")),
        }
    }
}
