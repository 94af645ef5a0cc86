#![doc = include_str!("../../../README.md")]
#![expect(dead_code, reason = "substrate APIs land ahead of the natives that use them")]
#![expect(clippy::cast_possible_truncation, reason = "numeric narrowing is checked")]
#![expect(clippy::cast_sign_loss, reason = "sign-changing casts are intentional")]
#![expect(clippy::cast_possible_wrap, reason = "wrap behavior is intentional at the casts kept")]
#![expect(clippy::unnecessary_wraps, reason = "dispatch signatures are uniform")]
#![expect(clippy::needless_pass_by_value, reason = "call APIs pass cells consistently")]
#![expect(clippy::too_many_arguments, reason = "invocation plumbing carries wide state")]
#![expect(clippy::struct_excessive_bools, reason = "series flags mirror the substrate's flag set")]
#![expect(clippy::type_complexity, reason = "walker callbacks are intentionally rich")]

mod action;
mod api;
mod bind;
mod compress;
mod context;
mod date;
mod error;
mod eval;
mod frame;
mod heap;
mod intern;
mod io;
mod localpath;
mod map;
mod mold;
mod natives;
mod port;
mod resource;
mod run;
mod scan;
mod series;
mod strings;
mod value;

pub use crate::{
    api::{ApiArg, Datum, Handle},
    compress::Envelope,
    error::ErrorReport,
    heap::HeapStats,
    io::{CollectStringPrint, NoPrint, PrintWriter, StdPrint},
    port::{DeviceCommand, PortDriver, RamFileDriver, RequestState},
    resource::{DEFAULT_MAX_RECURSION_DEPTH, ResourceError, ResourceLimits, Tracker},
    run::{RawBuf, Session},
    value::{Event, EventType},
};
