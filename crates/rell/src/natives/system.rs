//! Molding, scanning, path translation, and compression natives.

use crate::{
    bind::Specifier,
    compress::{Envelope, compress, decompress},
    error::{ErrorId, RunError, RunResult},
    eval::{Feed, Machine},
    heap::{HeapData, HeapId},
    localpath::{to_language_path, to_local_path},
    mold::{form, mold},
    natives::Native,
    series::Binary,
    strings::Text,
    value::{BinRef, SeqKind, Strand, StrandKind, Value},
};

pub(super) fn call(native: Native, machine: &mut Machine, frame: HeapId) -> RunResult<Option<Value>> {
    match native {
        Native::Print => {
            let value = machine.arg(frame, 0);
            let text = match value {
                // A block prints its reduced contents, space-joined.
                Value::Seq(s) if s.kind == SeqKind::Block => {
                    let mut feed = Feed::for_seq(&s, Specifier::NONE);
                    let mut parts: Vec<String> = Vec::new();
                    while !feed.at_end(&machine.heap) {
                        if let Some(v) = machine.eval_step(&mut feed, false)? {
                            parts.push(form(&machine.heap, &machine.interner, &v));
                        }
                    }
                    parts.join(" ")
                }
                other => form(&machine.heap, &machine.interner, &other),
            };
            machine.output.push_str(&text);
            machine.output.push('\n');
            Ok(Some(Value::Null))
        }
        Native::Probe => {
            let value = machine.arg(frame, 0);
            let text = mold(&machine.heap, &machine.interner, &value);
            machine.output.push_str(&text);
            machine.output.push('\n');
            Ok(Some(value))
        }
        Native::Mold => {
            let value = machine.arg(frame, 0);
            machine.mold_stack.push(String::new());
            let text = mold(&machine.heap, &machine.interner, &value);
            machine.mold_stack.pop().expect("mold buffer pushed above");
            let id = machine.heap.alloc(HeapData::Text(Text::from_str(&text)))?;
            Ok(Some(Value::text(id)))
        }
        Native::Form => {
            let value = machine.arg(frame, 0);
            let text = form(&machine.heap, &machine.interner, &value);
            let id = machine.heap.alloc(HeapData::Text(Text::from_str(&text)))?;
            Ok(Some(Value::text(id)))
        }
        Native::Load => {
            let Value::Strand(s) = machine.arg(frame, 0) else {
                return Err(RunError::fail(ErrorId::InvalidArg, "load takes source text"));
            };
            let src = machine.heap.text(s.series).str_from(s.index).to_owned();
            let block = crate::scan::scan_source(&mut machine.heap, &mut machine.interner, &src, None)?;
            let (user, lib) = (machine.user, machine.lib);
            crate::bind::bind_source(&mut machine.heap, &mut machine.interner, block, user, lib);
            Ok(Some(Value::block(block)))
        }
        Native::ToLocalFile => {
            let strand = strand_arg(machine, frame, 0)?;
            let full = machine.refinement_on(frame, 1);
            let mut local = to_local_path(&strand, cfg!(target_os = "windows"));
            if full && !local.starts_with('/') && !local.contains(':') {
                if let Ok(cwd) = std::env::current_dir() {
                    local = cwd.join(&local).to_string_lossy().into_owned();
                }
            }
            let id = machine.heap.alloc(HeapData::Text(Text::from_str(&local)))?;
            Ok(Some(Value::text(id)))
        }
        Native::ToRellFile => {
            let strand = strand_arg(machine, frame, 0)?;
            let path = to_language_path(&strand, cfg!(target_os = "windows"));
            let id = machine.heap.alloc(HeapData::Text(Text::from_str(&path)))?;
            Ok(Some(Value::Strand(Strand {
                kind: StrandKind::File,
                series: id,
                index: 0,
            })))
        }
        Native::Deflate => pack(machine, frame, Envelope::Raw),
        Native::Zdeflate => pack(machine, frame, Envelope::Zlib),
        Native::Gzip => pack(machine, frame, Envelope::Gzip),
        Native::Inflate => unpack(machine, frame, Envelope::Raw),
        Native::Zinflate => unpack(machine, frame, Envelope::Zlib),
        Native::Gunzip => unpack(machine, frame, Envelope::Gzip),
        other => unreachable!("{} is not a system native", other.name()),
    }
}

fn strand_arg(machine: &Machine, frame: HeapId, pos: usize) -> RunResult<String> {
    match machine.arg(frame, pos) {
        Value::Strand(s) => Ok(machine.heap.text(s.series).str_from(s.index).to_owned()),
        other => Err(RunError::fail(
            ErrorId::ExpectArg,
            format!("expected a string, found {}", other.kind()),
        )),
    }
}

fn data_bytes(machine: &Machine, frame: HeapId, pos: usize) -> RunResult<Vec<u8>> {
    match machine.arg(frame, pos) {
        Value::Binary(b) => Ok(machine.heap.binary(b.series).slice_from(b.index).to_vec()),
        Value::Strand(s) => Ok(machine.heap.text(s.series).str_from(s.index).as_bytes().to_vec()),
        other => Err(RunError::fail(
            ErrorId::ExpectArg,
            format!("expected binary data, found {}", other.kind()),
        )),
    }
}

fn pack(machine: &mut Machine, frame: HeapId, envelope: Envelope) -> RunResult<Option<Value>> {
    let data = data_bytes(machine, frame, 0)?;
    let packed = compress(&data, envelope)?;
    let id = machine.heap.alloc(HeapData::Binary(Binary::from_bytes(packed)))?;
    Ok(Some(Value::Binary(BinRef { series: id, index: 0 })))
}

fn unpack(machine: &mut Machine, frame: HeapId, envelope: Envelope) -> RunResult<Option<Value>> {
    let data = data_bytes(machine, frame, 0)?;
    let max = if machine.refinement_on(frame, 1) {
        match machine.arg(frame, 2) {
            Value::Integer(n) => Some(n.max(0) as usize),
            _ => None,
        }
    } else {
        None
    };
    let unpacked = decompress(&data, envelope, max)?;
    let id = machine.heap.alloc(HeapData::Binary(Binary::from_bytes(unpacked)))?;
    Ok(Some(Value::Binary(BinRef { series: id, index: 0 })))
}
