//! Control-flow natives: branching, non-local exits, reduction.

use crate::{
    bind::Specifier,
    context::make_context,
    error::{ErrorData, ErrorId, RunError, RunResult},
    eval::{Feed, Machine},
    heap::{HeapData, HeapId},
    natives::Native,
    series::Array,
    strings::Text,
    value::{CtxKind, CtxRef, Seq, SeqKind, Strand, StrandKind, Value, WordKind},
};

pub(super) fn call(native: Native, machine: &mut Machine, frame: HeapId) -> RunResult<Option<Value>> {
    match native {
        Native::If => {
            let condition = machine.arg(frame, 0);
            let branch = block_arg(machine, frame, 1)?;
            if condition.is_truthy() {
                machine.eval_seq(&branch, Specifier::NONE).map(Some)
            } else {
                Ok(Some(Value::Null))
            }
        }
        Native::Either => {
            let condition = machine.arg(frame, 0);
            let which = if condition.is_truthy() { 1 } else { 2 };
            let branch = block_arg(machine, frame, which)?;
            machine.eval_seq(&branch, Specifier::NONE).map(Some)
        }
        Native::Any => {
            let block = block_arg(machine, frame, 0)?;
            let mut feed = Feed::for_seq(&block, Specifier::NONE);
            while !feed.at_end(&machine.heap) {
                if let Some(value) = machine.eval_step(&mut feed, false)?
                    && value.is_truthy()
                {
                    return Ok(Some(value));
                }
            }
            Ok(Some(Value::Null))
        }
        Native::All => {
            let block = block_arg(machine, frame, 0)?;
            let mut feed = Feed::for_seq(&block, Specifier::NONE);
            let mut last = Value::Logic(true);
            while !feed.at_end(&machine.heap) {
                if let Some(value) = machine.eval_step(&mut feed, false)? {
                    if !value.is_truthy() {
                        return Ok(Some(Value::Null));
                    }
                    last = value;
                }
            }
            Ok(Some(last))
        }
        Native::Reduce => {
            let block = block_arg(machine, frame, 0)?;
            let depth = machine.data_stack.len();
            let mut feed = Feed::for_seq(&block, Specifier::NONE);
            while !feed.at_end(&machine.heap) {
                if let Some(value) = machine.eval_step(&mut feed, false)? {
                    machine.data_stack.push(value);
                }
            }
            let values: Vec<Value> = machine.data_stack.split_off(depth);
            let id = machine.heap.alloc(HeapData::Array(Array::from_values(values)))?;
            Ok(Some(Value::block(id)))
        }
        Native::Do => do_native(machine, frame),
        Native::Catch => catch_native(machine, frame),
        Native::Throw => {
            let value = machine.arg(frame, 0);
            let label = if machine.refinement_on(frame, 1) {
                machine.arg(frame, 2)
            } else {
                Value::Blank
            };
            Err(RunError::Throw { label, value })
        }
        Native::Try => {
            let block = block_arg(machine, frame, 0)?;
            let depths = machine.depths();
            match machine.eval_seq(&block, Specifier::NONE) {
                Ok(value) => Ok(Some(value)),
                Err(RunError::Fail(_)) => {
                    machine.restore_depths(depths);
                    Ok(Some(Value::Null))
                }
                Err(other) => Err(other),
            }
        }
        Native::Trap => {
            let block = block_arg(machine, frame, 0)?;
            let depths = machine.depths();
            match machine.eval_seq(&block, Specifier::NONE) {
                Ok(_) => Ok(Some(Value::Null)),
                Err(RunError::Fail(data)) => {
                    machine.restore_depths(depths);
                    let error = error_to_value(machine, &data)?;
                    Ok(Some(error))
                }
                Err(other) => Err(other),
            }
        }
        Native::Fail => fail_native(machine, frame),
        Native::Return => {
            let value = machine.arg(frame, 0);
            // The nearest interpreted frame below this native's own.
            let target = machine
                .frames
                .iter()
                .rev()
                .skip(1)
                .find(|info| {
                    matches!(
                        machine.heap.action_body(info.action).dispatcher,
                        crate::action::Dispatcher::Interpreted { .. }
                    )
                })
                .map(|info| info.varlist);
            let Some(varlist) = target else {
                return Err(RunError::fail(ErrorId::InvalidArg, "return used outside a function"));
            };
            Err(RunError::Throw {
                label: Value::frame(varlist),
                value,
            })
        }
        Native::Quit => {
            let value = if machine.refinement_on(frame, 0) {
                machine.arg(frame, 1)
            } else {
                Value::Null
            };
            Err(RunError::Quit(value))
        }
        Native::Halt => Err(RunError::Halt),
        Native::Comment | Native::Elide => Ok(None),
        Native::Recycle => {
            let swept = machine.collect_garbage();
            Ok(Some(Value::Integer(swept as i64)))
        }
        other => unreachable!("{} is not a control native", other.name()),
    }
}

fn do_native(machine: &mut Machine, frame: HeapId) -> RunResult<Option<Value>> {
    let source = machine.arg(frame, 0);
    match source {
        Value::Seq(seq) if matches!(seq.kind, SeqKind::Block | SeqKind::Group) => {
            machine.eval_seq(&seq, Specifier::NONE).map(Some)
        }
        Value::Strand(s) if s.kind == StrandKind::Text => {
            let src = machine.heap.text(s.series).str_from(s.index).to_owned();
            let block = crate::scan::scan_source(&mut machine.heap, &mut machine.interner, &src, None)?;
            let (user, lib) = (machine.user, machine.lib);
            crate::bind::bind_source(&mut machine.heap, &mut machine.interner, block, user, lib);
            let seq = Seq::new(SeqKind::Block, block);
            machine.eval_seq(&seq, Specifier::NONE).map(Some)
        }
        Value::Action(act) => machine.invoke_with_values(act.action, &[]),
        Value::Context(CtxRef {
            kind: CtxKind::Frame,
            varlist,
        }) => {
            // Run a copy of the reified frame so its state survives.
            let (core, vars) = {
                let ctx = machine.heap.ctx(varlist);
                if ctx.inaccessible {
                    return Err(RunError::fail(ErrorId::Inaccessible, "frame has ended"));
                }
                let Some(core) = ctx.action else {
                    return Err(RunError::fail(ErrorId::InvalidArg, "frame has no action"));
                };
                (core, ctx.vars.clone())
            };
            let fresh = crate::frame::make_frame(&mut machine.heap, core)?;
            for (slot, value) in vars.iter().enumerate().skip(1) {
                // Slots the user never filled run as null.
                let value = if value.is_unset() { Value::Null } else { *value };
                machine.heap.ctx_mut(fresh).set_slot(slot, value);
            }
            machine.frames.push(crate::frame::FrameInfo {
                action: core,
                varlist: fresh,
                owned_handles: Vec::new(),
            });
            let result = machine.dispatch_frame(core, fresh);
            let info = machine.frames.pop().expect("frame just pushed");
            for node in info.owned_handles {
                if machine.heap.is_live(node) {
                    machine.heap.set_root(node, false);
                    machine.heap.free(node);
                }
            }
            crate::frame::teardown_frame(&mut machine.heap, fresh);
            result
        }
        other => Err(RunError::fail(
            ErrorId::InvalidArg,
            format!("do cannot run a {}", other.kind()),
        )),
    }
}

fn catch_native(machine: &mut Machine, frame: HeapId) -> RunResult<Option<Value>> {
    let block = block_arg(machine, frame, 0)?;
    let name_on = machine.refinement_on(frame, 1);
    let name_word = machine.arg(frame, 2);
    let any_on = machine.refinement_on(frame, 3);
    let quit_on = machine.refinement_on(frame, 4);

    let depths = machine.depths();
    match machine.eval_seq(&block, Specifier::NONE) {
        Ok(value) => Ok(Some(value)),
        Err(RunError::Quit(value)) if quit_on => {
            machine.restore_depths(depths);
            Ok(Some(value))
        }
        Err(RunError::Throw { label, value }) => {
            // A blanket catcher takes every label; quit is not a throw and
            // stays out of its reach.
            if any_on {
                machine.restore_depths(depths);
                return Ok(Some(value));
            }
            if name_on {
                machine.restore_depths(depths);
                let matched = match name_word {
                    Value::Seq(seq) if seq.kind == SeqKind::Block => {
                        let names: Vec<Value> = machine.heap.array(seq.series).slice_from(seq.index).to_vec();
                        names.iter().any(|name| machine.values_equal(&label, name))
                    }
                    single => machine.values_equal(&label, &single),
                };
                // A name mismatch swallows the throw and reads as null.
                return Ok(Some(if matched { value } else { Value::Null }));
            }
            if matches!(label, Value::Blank) {
                machine.restore_depths(depths);
                return Ok(Some(value));
            }
            // Labeled throws pass an unlabeled catch (returns and named
            // throws keep unwinding to their own catcher).
            Err(RunError::Throw { label, value })
        }
        Err(other) => Err(other),
    }
}

fn fail_native(machine: &mut Machine, frame: HeapId) -> RunResult<Option<Value>> {
    let reason = machine.arg(frame, 0);
    match reason {
        Value::Strand(s) => {
            let message = machine.heap.text(s.series).str_from(s.index).to_owned();
            Err(RunError::fail(ErrorId::User, message))
        }
        Value::Word(w) => {
            let spelling = machine.interner.spelling(w.symbol);
            let id = spelling.parse().unwrap_or(ErrorId::User);
            Err(RunError::fail(id, spelling.to_owned()))
        }
        Value::Context(CtxRef {
            kind: CtxKind::Error,
            varlist,
        }) => {
            let data = value_to_error(machine, varlist);
            Err(RunError::Fail(Box::new(data)))
        }
        other => Err(RunError::fail(
            ErrorId::InvalidArg,
            format!("fail cannot raise a {}", other.kind()),
        )),
    }
}

/// Builds an error! context from raised error data; `trap` hands these to
/// user code, and `fail` can raise them again.
pub(crate) fn error_to_value(machine: &mut Machine, data: &ErrorData) -> RunResult<Value> {
    let syms: Vec<_> = ["id", "message", "near", "file", "line"]
        .iter()
        .map(|name| machine.interner.intern(name))
        .collect();
    let ctx = make_context(&mut machine.heap, CtxKind::Error, &syms)?;
    let id_sym = machine.interner.intern(&data.id.to_string());
    machine.heap.ctx_mut(ctx).set_slot(1, Value::word(WordKind::Plain, id_sym));
    let message = machine.heap.alloc(HeapData::Text(Text::from_str(&data.message)))?;
    machine.heap.ctx_mut(ctx).set_slot(2, Value::text(message));
    if let Some(near) = &data.near {
        let near_id = machine.heap.alloc(HeapData::Text(Text::from_str(near)))?;
        machine.heap.ctx_mut(ctx).set_slot(3, Value::text(near_id));
    }
    if let Some(file) = &data.file {
        let file_id = machine.heap.alloc(HeapData::Text(Text::from_str(file)))?;
        machine.heap.ctx_mut(ctx).set_slot(
            4,
            Value::Strand(Strand {
                kind: StrandKind::File,
                series: file_id,
                index: 0,
            }),
        );
    }
    if let Some(line) = data.line {
        machine.heap.ctx_mut(ctx).set_slot(5, Value::Integer(i64::from(line)));
    }
    Ok(Value::Context(CtxRef {
        kind: CtxKind::Error,
        varlist: ctx,
    }))
}

/// Reads an error! context back into raisable data.
fn value_to_error(machine: &Machine, varlist: HeapId) -> ErrorData {
    let heap = &machine.heap;
    let interner = &machine.interner;
    let read = |name: &str| -> Option<Value> {
        let sym = interner.try_lookup(name)?;
        let slot = crate::context::find_slot(heap, interner, varlist, sym)?;
        let value = *heap.ctx(varlist).slot(slot);
        if value.is_unset() { None } else { Some(value) }
    };
    let id = match read("id") {
        Some(Value::Word(w)) => interner.spelling(w.symbol).parse().unwrap_or(ErrorId::User),
        _ => ErrorId::User,
    };
    let message = match read("message") {
        Some(Value::Strand(s)) => heap.text(s.series).str_from(s.index).to_owned(),
        _ => String::new(),
    };
    let mut data = ErrorData::new(id, message);
    if let Some(Value::Strand(s)) = read("near") {
        data.near = Some(heap.text(s.series).str_from(s.index).to_owned());
    }
    if let Some(Value::Strand(s)) = read("file") {
        data.file = Some(heap.text(s.series).str_from(s.index).to_owned());
    }
    if let Some(Value::Integer(line)) = read("line") {
        data.line = u32::try_from(line).ok();
    }
    data
}

/// Reads a block-valued argument.
pub(super) fn block_arg(machine: &Machine, frame: HeapId, pos: usize) -> RunResult<Seq> {
    match machine.arg(frame, pos) {
        Value::Seq(seq) => Ok(seq),
        other => Err(RunError::fail(
            ErrorId::ExpectArg,
            format!("expected a block, found {}", other.kind()),
        )),
    }
}
