//! Series natives: positions, picking, mutation, search.

use crate::{
    bind::Specifier,
    context::derive_context,
    error::{ErrorId, RunError, RunResult},
    eval::{Machine, ensure_array_mutable},
    heap::{HeapData, HeapId},
    mold,
    natives::Native,
    series::Binary,
    strings::Text,
    value::{BinRef, CtxRef, Seq, Strand, StrandKind, Value},
};

pub(super) fn call(native: Native, machine: &mut Machine, frame: HeapId) -> RunResult<Option<Value>> {
    match native {
        Native::Copy => copy_native(machine, frame),
        Native::Pick => {
            let series = machine.arg(frame, 0);
            let index = machine.arg(frame, 1);
            machine.pick_step(series, index, Specifier::NONE).map(Some)
        }
        Native::Poke => {
            let series = machine.arg(frame, 0);
            let index = machine.arg(frame, 1);
            let value = machine.arg(frame, 2);
            match series {
                Value::Binary(b) => {
                    let (Value::Integer(n), Value::Integer(byte)) = (index, value) else {
                        return Err(RunError::fail(ErrorId::InvalidArg, "binary poke takes integers"));
                    };
                    ensure_binary_mutable(machine, b.series)?;
                    let at = b.index as usize + (n - 1).max(0) as usize;
                    let len = machine.heap.binary(b.series).len();
                    if n < 1 || at >= len {
                        return Err(RunError::fail(ErrorId::OutOfRange, format!("poke index {n} out of range")));
                    }
                    let byte = u8::try_from(byte)
                        .map_err(|_| RunError::fail(ErrorId::InvalidArg, "binary poke needs a byte value"))?;
                    machine.heap.binary_mut(b.series).set(at, byte);
                    Ok(Some(value))
                }
                other => {
                    machine.assign_into(other, index, value)?;
                    Ok(Some(value))
                }
            }
        }
        Native::Insert => splice(machine, frame, false),
        Native::Append => splice(machine, frame, true),
        Native::LengthOf => {
            let series = machine.arg(frame, 0);
            // A blank answers null from count reflectors.
            if matches!(series, Value::Blank) {
                return Ok(Some(Value::Null));
            }
            Ok(Some(Value::Integer(series_len(machine, &series)? as i64)))
        }
        Native::IndexOf => {
            let series = machine.arg(frame, 0);
            let index = match series {
                Value::Seq(s) => s.index,
                Value::Strand(s) => s.index,
                Value::Binary(b) => b.index,
                other => {
                    return Err(RunError::fail(
                        ErrorId::InvalidArg,
                        format!("index-of cannot inspect a {}", other.kind()),
                    ));
                }
            };
            Ok(Some(Value::Integer(i64::from(index) + 1)))
        }
        Native::HeadOf => reposition(machine, frame, Reposition::Head),
        Native::TailOf => reposition(machine, frame, Reposition::Tail),
        Native::NextOf => reposition(machine, frame, Reposition::Forward(1)),
        Native::BackOf => reposition(machine, frame, Reposition::Backward(1)),
        Native::Skip => {
            let Value::Integer(count) = machine.arg(frame, 1) else {
                return Err(RunError::fail(ErrorId::InvalidArg, "skip needs an integer count"));
            };
            let step = if count >= 0 {
                Reposition::Forward(count as usize)
            } else {
                Reposition::Backward((-count) as usize)
            };
            reposition(machine, frame, step)
        }
        Native::Take => take_native(machine, frame),
        Native::First => {
            let series = machine.arg(frame, 0);
            machine.pick_step(series, Value::Integer(1), Specifier::NONE).map(Some)
        }
        Native::Last => {
            let series = machine.arg(frame, 0);
            let len = series_len(machine, &series)? as i64;
            if len == 0 {
                return Ok(Some(Value::Null));
            }
            machine.pick_step(series, Value::Integer(len), Specifier::NONE).map(Some)
        }
        Native::Find => find_native(machine, frame),
        Native::Select => select_native(machine, frame),
        Native::Put => {
            let Value::Map(id) = machine.arg(frame, 0) else {
                return Err(RunError::fail(ErrorId::InvalidArg, "put targets a map"));
            };
            let key = machine.arg(frame, 1);
            let value = machine.arg(frame, 2);
            crate::map::insert_map(&mut machine.heap, &machine.interner, id, key, value)?;
            Ok(Some(value))
        }
        other => unreachable!("{} is not a series native", other.name()),
    }
}

fn copy_native(machine: &mut Machine, frame: HeapId) -> RunResult<Option<Value>> {
    let value = machine.arg(frame, 0);
    let part_on = machine.refinement_on(frame, 1);
    let limit = match machine.arg(frame, 2) {
        Value::Integer(n) => Some(n.max(0) as usize),
        _ => None,
    };
    let deep = machine.refinement_on(frame, 3);

    match value {
        Value::Seq(s) => {
            // Relative content always deep-copies with derelativization;
            // a plain copy would leak frame-relative words.
            let relative = machine.heap.array(s.series).relative_to.is_some();
            let copied = if deep || relative {
                let spec = Specifier::NONE.derive(&s.binding);
                crate::bind::copy_derelativized(&mut machine.heap, s.series, s.index, spec)?
            } else {
                let cells: Vec<Value> = machine.heap.array(s.series).slice_from(s.index).to_vec();
                machine
                    .heap
                    .alloc(HeapData::Array(crate::series::Array::from_values(cells)))?
            };
            if part_on && let Some(n) = limit {
                machine.heap.array_mut(copied).truncate(n);
            }
            Ok(Some(Value::Seq(Seq {
                kind: s.kind,
                series: copied,
                index: 0,
                binding: crate::bind::Binding::Unbound,
            })))
        }
        Value::Strand(s) => {
            let mut content = machine.heap.text(s.series).str_from(s.index).to_owned();
            if part_on && let Some(n) = limit {
                content = content.chars().take(n).collect();
            }
            let id = machine.heap.alloc(HeapData::Text(Text::from_str(&content)))?;
            Ok(Some(Value::Strand(Strand {
                kind: s.kind,
                series: id,
                index: 0,
            })))
        }
        Value::Binary(b) => {
            let mut bytes = machine.heap.binary(b.series).slice_from(b.index).to_vec();
            if part_on && let Some(n) = limit {
                bytes.truncate(n);
            }
            let id = machine.heap.alloc(HeapData::Binary(Binary::from_bytes(bytes)))?;
            Ok(Some(Value::Binary(BinRef { series: id, index: 0 })))
        }
        Value::Map(id) => {
            let pairs: Vec<Value> = machine.heap.map(id).pairs().to_vec();
            let live: Vec<Value> = pairs
                .chunks_exact(2)
                .filter(|pair| !matches!(pair[1], Value::Null))
                .flat_map(<[Value]>::to_vec)
                .collect();
            let copied = crate::map::make_map(&mut machine.heap, &machine.interner, live)?;
            Ok(Some(Value::Map(copied)))
        }
        Value::Context(c) => {
            let copied = derive_context(&mut machine.heap, c.varlist)?;
            Ok(Some(Value::Context(CtxRef {
                kind: c.kind,
                varlist: copied,
            })))
        }
        other => Err(RunError::fail(
            ErrorId::InvalidArg,
            format!("copy cannot duplicate a {}", other.kind()),
        )),
    }
}

fn splice(machine: &mut Machine, frame: HeapId, append: bool) -> RunResult<Option<Value>> {
    let series = machine.arg(frame, 0);
    let value = machine.arg(frame, 1);
    let part_on = machine.refinement_on(frame, 2);
    let limit = match machine.arg(frame, 3) {
        Value::Integer(n) => Some(n.max(0) as usize),
        _ => None,
    };
    let dup = if machine.refinement_on(frame, 4) {
        match machine.arg(frame, 5) {
            Value::Integer(n) => n.max(0) as usize,
            _ => 1,
        }
    } else {
        1
    };
    let only = machine.refinement_on(frame, 6);

    match series {
        Value::Seq(s) => {
            ensure_array_mutable(&machine.heap, s.series)?;
            let mut incoming: Vec<Value> = match value {
                Value::Seq(src) if !only && !src.kind.is_path() => {
                    machine.heap.array(src.series).slice_from(src.index).to_vec()
                }
                single => vec![single],
            };
            if part_on && let Some(n) = limit {
                incoming.truncate(n);
            }
            let at = if append {
                machine.heap.array(s.series).len()
            } else {
                s.index as usize
            };
            let mut inserted = 0usize;
            for _ in 0..dup {
                machine.heap.array_mut(s.series).insert_at(at + inserted, &incoming);
                inserted += incoming.len();
            }
            let result_index = if append { 0 } else { (at + inserted) as u32 };
            Ok(Some(Value::Seq(Seq {
                index: result_index,
                ..s
            })))
        }
        Value::Strand(s) => {
            ensure_text_mutable(machine, s.series)?;
            let mut incoming = match value {
                Value::Strand(src) => machine.heap.text(src.series).str_from(src.index).to_owned(),
                Value::Char(c) => c.to_string(),
                other => mold::form(&machine.heap, &machine.interner, &other),
            };
            if part_on && let Some(n) = limit {
                incoming = incoming.chars().take(n).collect();
            }
            let at = if append {
                machine.heap.text(s.series).len_chars()
            } else {
                s.index as usize
            };
            let mut inserted = 0usize;
            for _ in 0..dup {
                machine.heap.text_mut(s.series).insert_str_at(at + inserted, &incoming);
                inserted += incoming.chars().count();
            }
            let result_index = if append { 0 } else { (at + inserted) as u32 };
            Ok(Some(Value::Strand(Strand {
                index: result_index,
                ..s
            })))
        }
        Value::Binary(b) => {
            ensure_binary_mutable(machine, b.series)?;
            let mut incoming: Vec<u8> = match value {
                Value::Binary(src) => machine.heap.binary(src.series).slice_from(src.index).to_vec(),
                Value::Integer(n) => vec![
                    u8::try_from(n)
                        .map_err(|_| RunError::fail(ErrorId::InvalidArg, "binary insert needs a byte value"))?,
                ],
                Value::Strand(src) => machine.heap.text(src.series).str_from(src.index).as_bytes().to_vec(),
                other => {
                    return Err(RunError::fail(
                        ErrorId::InvalidArg,
                        format!("cannot insert {} into a binary", other.kind()),
                    ));
                }
            };
            if part_on && let Some(n) = limit {
                incoming.truncate(n);
            }
            let at = if append {
                machine.heap.binary(b.series).len()
            } else {
                b.index as usize
            };
            let mut inserted = 0usize;
            for _ in 0..dup {
                machine.heap.binary_mut(b.series).insert_at(at + inserted, &incoming);
                inserted += incoming.len();
            }
            let result_index = if append { 0 } else { (at + inserted) as u32 };
            Ok(Some(Value::Binary(BinRef {
                index: result_index,
                ..b
            })))
        }
        other => Err(RunError::fail(
            ErrorId::InvalidArg,
            format!("cannot insert into a {}", other.kind()),
        )),
    }
}

fn series_len(machine: &Machine, value: &Value) -> RunResult<usize> {
    Ok(match value {
        Value::Seq(s) => machine.heap.array(s.series).slice_from(s.index).len(),
        Value::Strand(s) => machine.heap.text(s.series).len_chars().saturating_sub(s.index as usize),
        Value::Binary(b) => machine.heap.binary(b.series).slice_from(b.index).len(),
        Value::Map(id) => machine.heap.map(*id).live_len(),
        Value::Context(c) => machine.heap.ctx(c.varlist).slot_count(),
        Value::Tuple(t) => t.len as usize,
        Value::Pair(..) => 2,
        other => {
            return Err(RunError::fail(
                ErrorId::InvalidArg,
                format!("length-of cannot count a {}", other.kind()),
            ));
        }
    })
}

enum Reposition {
    Head,
    Tail,
    Forward(usize),
    Backward(usize),
}

fn reposition(machine: &mut Machine, frame: HeapId, how: Reposition) -> RunResult<Option<Value>> {
    let series = machine.arg(frame, 0);
    let (index, len) = match &series {
        Value::Seq(s) => (s.index as usize, machine.heap.array(s.series).len()),
        Value::Strand(s) => (s.index as usize, machine.heap.text(s.series).len_chars()),
        Value::Binary(b) => (b.index as usize, machine.heap.binary(b.series).len()),
        other => {
            return Err(RunError::fail(
                ErrorId::InvalidArg,
                format!("cannot reposition a {}", other.kind()),
            ));
        }
    };
    let new_index = match how {
        Reposition::Head => 0,
        Reposition::Tail => len,
        Reposition::Forward(n) => (index + n).min(len),
        Reposition::Backward(n) => index.saturating_sub(n),
    } as u32;
    Ok(Some(match series {
        Value::Seq(s) => Value::Seq(Seq { index: new_index, ..s }),
        Value::Strand(s) => Value::Strand(Strand { index: new_index, ..s }),
        Value::Binary(b) => Value::Binary(BinRef { index: new_index, ..b }),
        _ => unreachable!("kind checked above"),
    }))
}

fn take_native(machine: &mut Machine, frame: HeapId) -> RunResult<Option<Value>> {
    let series = machine.arg(frame, 0);
    let last = machine.refinement_on(frame, 1);
    match series {
        Value::Seq(s) => {
            ensure_array_mutable(&machine.heap, s.series)?;
            let len = machine.heap.array(s.series).slice_from(s.index).len();
            if len == 0 {
                return Ok(Some(Value::Null));
            }
            let at = if last {
                s.index as usize + len - 1
            } else {
                s.index as usize
            };
            let taken = machine.heap.array(s.series).get(at).copied().expect("length checked");
            machine.heap.array_mut(s.series).remove_at(at, 1);
            Ok(Some(taken))
        }
        Value::Strand(s) => {
            ensure_text_mutable(machine, s.series)?;
            let len = machine.heap.text(s.series).len_chars().saturating_sub(s.index as usize);
            if len == 0 {
                return Ok(Some(Value::Null));
            }
            let at = if last {
                s.index as usize + len - 1
            } else {
                s.index as usize
            };
            let c = machine.heap.text_mut(s.series).char_at(at).expect("length checked");
            machine.heap.text_mut(s.series).remove_at(at, 1);
            Ok(Some(Value::Char(c)))
        }
        Value::Binary(b) => {
            ensure_binary_mutable(machine, b.series)?;
            let len = machine.heap.binary(b.series).slice_from(b.index).len();
            if len == 0 {
                return Ok(Some(Value::Null));
            }
            let at = if last {
                b.index as usize + len - 1
            } else {
                b.index as usize
            };
            let byte = machine.heap.binary(b.series).as_slice()[at];
            machine.heap.binary_mut(b.series).remove_at(at, 1);
            Ok(Some(Value::Integer(i64::from(byte))))
        }
        other => Err(RunError::fail(
            ErrorId::InvalidArg,
            format!("take cannot consume a {}", other.kind()),
        )),
    }
}

fn find_native(machine: &mut Machine, frame: HeapId) -> RunResult<Option<Value>> {
    let series = machine.arg(frame, 0);
    let value = machine.arg(frame, 1);
    match series {
        Value::Seq(s) => {
            let cells: Vec<Value> = machine.heap.array(s.series).slice_from(s.index).to_vec();
            for (pos, cell) in cells.iter().enumerate() {
                if machine.values_equal(cell, &value) {
                    return Ok(Some(Value::Seq(Seq {
                        index: s.index + pos as u32,
                        ..s
                    })));
                }
            }
            Ok(Some(Value::Null))
        }
        Value::Strand(s) => {
            let haystack = machine.heap.text(s.series).str_from(s.index).to_owned();
            let needle = match value {
                Value::Strand(n) => machine.heap.text(n.series).str_from(n.index).to_owned(),
                Value::Char(c) => c.to_string(),
                other => mold::form(&machine.heap, &machine.interner, &other),
            };
            match haystack.to_lowercase().find(&needle.to_lowercase()) {
                Some(byte_pos) => {
                    let char_pos = haystack[..byte_pos].chars().count();
                    Ok(Some(Value::Strand(Strand {
                        index: s.index + char_pos as u32,
                        ..s
                    })))
                }
                None => Ok(Some(Value::Null)),
            }
        }
        other => Err(RunError::fail(
            ErrorId::InvalidArg,
            format!("find cannot search a {}", other.kind()),
        )),
    }
}

fn select_native(machine: &mut Machine, frame: HeapId) -> RunResult<Option<Value>> {
    let series = machine.arg(frame, 0);
    let key = machine.arg(frame, 1);
    match series {
        Value::Seq(s) => {
            let cells: Vec<Value> = machine.heap.array(s.series).slice_from(s.index).to_vec();
            for (pos, cell) in cells.iter().enumerate() {
                if machine.values_equal(cell, &key) {
                    return Ok(Some(cells.get(pos + 1).copied().unwrap_or(Value::Null)));
                }
            }
            Ok(Some(Value::Null))
        }
        Value::Map(id) => Ok(Some(
            crate::map::select_map(&machine.heap, &machine.interner, id, &key).unwrap_or(Value::Null),
        )),
        Value::Context(c) => {
            let Value::Word(w) = key else {
                return Err(RunError::fail(ErrorId::InvalidArg, "context select takes a word"));
            };
            match crate::context::find_slot(&machine.heap, &machine.interner, c.varlist, w.symbol) {
                Some(slot) => {
                    let value = *machine.heap.ctx(c.varlist).slot(slot);
                    Ok(Some(if value.is_unset() { Value::Null } else { value }))
                }
                None => Ok(Some(Value::Null)),
            }
        }
        other => Err(RunError::fail(
            ErrorId::InvalidArg,
            format!("select cannot search a {}", other.kind()),
        )),
    }
}

fn ensure_text_mutable(machine: &Machine, series: HeapId) -> RunResult<()> {
    if !machine.heap.text(series).flags.can_mutate() {
        return Err(RunError::fail(ErrorId::Locked, "string is protected from mutation"));
    }
    Ok(())
}

fn ensure_binary_mutable(machine: &Machine, series: HeapId) -> RunResult<()> {
    if !machine.heap.binary(series).flags.can_mutate() {
        return Err(RunError::fail(ErrorId::Locked, "binary is protected from mutation"));
    }
    Ok(())
}
