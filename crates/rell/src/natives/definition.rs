//! Definition and reflection natives: function creation, specialization,
//! adaption, chaining, construction, binding, and the reflectors.

use smallvec::SmallVec;

use crate::{
    action::{ActionBody, Dispatcher, ParamClass, parse_param_spec, resolve_specialized},
    bind::{self, Binding, Specifier, bind_to_context, collect_set_words, copy_derelativized, relativize_body},
    context::{derive_context, find_slot, make_context},
    error::{ErrorId, RunError, RunResult},
    eval::{Feed, Machine},
    frame::{make_frame, reify_frame},
    heap::{BitsetData, HeapData, HeapId},
    intern::SymbolId,
    natives::{Native, control::block_arg},
    value::{ActRef, CtxKind, CtxRef, Event, EventType, Kind, Seq, SeqKind, Value, WordKind},
};

pub(super) fn call(native: Native, machine: &mut Machine, frame: HeapId) -> RunResult<Option<Value>> {
    match native {
        Native::Func => {
            let spec = block_arg(machine, frame, 0)?;
            let body = block_arg(machine, frame, 1)?;
            make_function(machine, Some(&spec), &body).map(|id| Some(Value::action(id)))
        }
        Native::Does => {
            let body = block_arg(machine, frame, 0)?;
            make_function(machine, None, &body).map(|id| Some(Value::action(id)))
        }
        Native::Specialize => {
            let target = machine.arg(frame, 0);
            let def = block_arg(machine, frame, 1)?;
            let (act, refinements) = machine.path_to_action(&target, Specifier::NONE)?;
            let action = specialize_action(machine, act, &refinements, Some(&def))?;
            Ok(Some(Value::action(action)))
        }
        Native::Adapt => adapt_native(machine, frame),
        Native::Chain => chain_native(machine, frame),
        Native::Hijack => {
            let victim_value = machine.arg(frame, 0);
            let usurper_value = machine.arg(frame, 1);
            let (victim, refinements) = machine.path_to_action(&victim_value, Specifier::NONE)?;
            if !refinements.is_empty() {
                return Err(RunError::fail(ErrorId::BadSpecializee, "hijack takes a plain action"));
            }
            let (usurper, refinements) = machine.path_to_action(&usurper_value, Specifier::NONE)?;
            if !refinements.is_empty() {
                return Err(RunError::fail(ErrorId::BadSpecializee, "hijack takes a plain action"));
            }
            let (usurper_core, _) = resolve_specialized(&machine.heap, usurper.action);
            if usurper_core == victim.action {
                return Err(RunError::fail(
                    ErrorId::BadSpecializee,
                    "hijacking an action with itself would loop",
                ));
            }
            machine.heap.action_body_mut(victim.action).dispatcher = Dispatcher::Hijacked {
                target: usurper.action,
            };
            Ok(Some(Value::action(usurper.action)))
        }
        Native::Make => make_native(machine, frame),
        Native::Bind => bind_native(machine, frame),
        Native::WordsOf => words_of(machine, frame),
        Native::ValuesOf => values_of(machine, frame),
        Native::TypeOf => {
            let value = machine.arg(frame, 0);
            Ok(Some(Value::Datatype(value.kind())))
        }
        Native::BindingOf => binding_of(machine, frame),
        Native::Get => {
            let source = machine.arg(frame, 0);
            match source {
                Value::Word(w) => {
                    let (varlist, slot) = bind::resolve_binding(&machine.heap, &w.binding, Specifier::NONE)?;
                    let ctx = machine.heap.ctx(varlist);
                    if ctx.inaccessible {
                        return Err(RunError::fail(
                            ErrorId::Inaccessible,
                            "word refers to a frame that has ended",
                        ));
                    }
                    let value = *ctx.slot(slot);
                    Ok(Some(if value.is_unset() { Value::Null } else { value }))
                }
                Value::Seq(s) if s.kind.is_path() => machine.eval_get_path(&s, Specifier::NONE).map(Some),
                other => Err(RunError::fail(
                    ErrorId::InvalidArg,
                    format!("get cannot read a {}", other.kind()),
                )),
            }
        }
        Native::Set => {
            let target = machine.arg(frame, 0);
            let value = machine.arg(frame, 1);
            match target {
                Value::Word(w) => {
                    bind::write_word(&mut machine.heap, &w, Specifier::NONE, value)?;
                    Ok(Some(value))
                }
                Value::Seq(s) if s.kind.is_path() => {
                    machine.store_through_path(&s, Specifier::NONE, value)?;
                    Ok(Some(value))
                }
                other => Err(RunError::fail(
                    ErrorId::InvalidArg,
                    format!("set cannot write a {}", other.kind()),
                )),
            }
        }
        Native::InCtx => {
            let context = machine.arg(frame, 0);
            let word = machine.arg(frame, 1);
            let (Value::Context(c), Value::Word(mut w)) = (context, word) else {
                return Err(RunError::fail(ErrorId::InvalidArg, "in needs a context and a word"));
            };
            match find_slot(&machine.heap, &machine.interner, c.varlist, w.symbol) {
                Some(slot) => {
                    w.binding = Binding::Context {
                        ctx: c.varlist,
                        index: slot as u32,
                    };
                    Ok(Some(Value::Word(w)))
                }
                None => Ok(Some(Value::Null)),
            }
        }
        Native::Protect => {
            let value = machine.arg(frame, 0);
            set_series_flag(machine, &value, |flags| flags.protected = true)?;
            Ok(Some(value))
        }
        Native::Lock => {
            let value = machine.arg(frame, 0);
            let deep = machine.refinement_on(frame, 1);
            lock_value(machine, &value, deep)?;
            Ok(Some(value))
        }
        other => unreachable!("{} is not a definition native", other.name()),
    }
}

/// Creates an interpreted action: parse the spec, deep-copy the body
/// (derelativizing against its stored binding), then relativize the copy's
/// parameter words against the new action's paramlist.
pub(crate) fn make_function(machine: &mut Machine, spec: Option<&Seq>, body: &Seq) -> RunResult<HeapId> {
    let params = match spec {
        Some(seq) => parse_param_spec(&machine.heap, &machine.interner, seq)?,
        None => Vec::new(),
    };
    let body_spec = Specifier::NONE.derive(&body.binding);
    let copied = copy_derelativized(&mut machine.heap, body.series, body.index, body_spec)?;
    let param_syms: Vec<SymbolId> = params.iter().map(|p| p.symbol).collect();
    let action = machine.heap.alloc(HeapData::Action(ActionBody {
        params,
        dispatcher: Dispatcher::Interpreted { body: copied },
        meta: None,
        name: None,
        enfix: false,
        returns: None,
    }))?;
    relativize_body(&mut machine.heap, &mut machine.interner, copied, action, &param_syms);
    Ok(action)
}

/// Builds a specialization of `act`.
///
/// Refinements named by the specializing path are marked with partial
/// sentinels carrying their ordering-stack position. The def block then
/// runs with the exemplar frame as its context; finalization converts each
/// refinement slot to enabled, disabled, still-partial, or unspecialized.
pub(crate) fn specialize_action(
    machine: &mut Machine,
    act: ActRef,
    refinement_syms: &[SymbolId],
    def: Option<&Seq>,
) -> RunResult<HeapId> {
    let (core, base_exemplar) = resolve_specialized(&machine.heap, act.action);
    let params = machine.heap.action_body(core).params.clone();

    let exemplar = make_frame(&mut machine.heap, core)?;
    if let Some(base) = base_exemplar {
        let vars = machine.heap.ctx(base).vars.clone();
        for (slot, value) in vars.iter().enumerate().skip(1) {
            machine.heap.ctx_mut(exemplar).set_slot(slot, *value);
        }
    }

    // Mark the path-requested refinements as partial, in request order.
    let mut next_pos: u16 = machine
        .heap
        .ctx(exemplar)
        .vars
        .iter()
        .filter_map(|v| match v {
            Value::PartialRefinement { stack_pos, .. } => Some(*stack_pos),
            _ => None,
        })
        .max()
        .unwrap_or(0)
        + 1;
    for sym in refinement_syms {
        let pos = params
            .iter()
            .position(|p| {
                matches!(p.class, ParamClass::Refinement) && machine.interner.same_spelling(p.symbol, *sym)
            })
            .ok_or_else(|| {
                RunError::fail(
                    ErrorId::BadRefine,
                    format!("{} is not a refinement", machine.interner.spelling(*sym)),
                )
            })?;
        if machine.heap.ctx(exemplar).slot(pos + 1).is_unset() {
            machine.heap.ctx_mut(exemplar).set_slot(
                pos + 1,
                Value::PartialRefinement {
                    symbol: params[pos].symbol,
                    stack_pos: next_pos,
                },
            );
            next_pos += 1;
        }
    }

    // Run the def block inside the exemplar: its set-words fill slots.
    // The exemplar is only reachable from this stack frame until the new
    // action exists, so it is guarded across the user code.
    if let Some(def) = def {
        let def_spec = Specifier::NONE.derive(&def.binding);
        let copied = copy_derelativized(&mut machine.heap, def.series, def.index, def_spec)?;
        bind_to_context(&mut machine.heap, &mut machine.interner, copied, exemplar);
        let seq = Seq::new(SeqKind::Block, copied);
        machine.heap.guard(exemplar);
        let evaluated = machine.eval_seq(&seq, Specifier::NONE);
        machine.heap.drop_guard();
        evaluated?;
    }

    finalize_partials(machine, exemplar, &params)?;

    // Facade: decided slots disappear from reflection; still-partial
    // refinements stay visible since their arguments remain gatherable.
    let mut new_params = params.clone();
    for (pos, param) in new_params.iter_mut().enumerate() {
        let value = *machine.heap.ctx(exemplar).slot(pos + 1);
        if !value.is_unset() && !matches!(value, Value::PartialRefinement { .. }) {
            param.hidden = true;
        }
    }

    reify_frame(&mut machine.heap, exemplar);
    let enfix = machine.heap.action_body(act.action).enfix;
    let name = machine.heap.action_body(core).name;
    let returns = machine.heap.action_body(core).returns;
    Ok(machine.heap.alloc(HeapData::Action(ActionBody {
        params: new_params,
        dispatcher: Dispatcher::Specialized {
            exemplar,
            base: act.action,
        },
        meta: None,
        name,
        enfix,
        returns,
    }))?)
}

/// Converts each refinement slot of a finished specialization to canonical
/// form: `true` (fulfilled), still-partial sentinel, `null` (disabled), or
/// unset (unspecialized).
fn finalize_partials(machine: &mut Machine, exemplar: HeapId, params: &[crate::action::Param]) -> RunResult<()> {
    let refinement_positions: Vec<usize> = params
        .iter()
        .enumerate()
        .filter(|(_, p)| matches!(p.class, ParamClass::Refinement))
        .map(|(pos, _)| pos)
        .collect();
    for pos in refinement_positions {
        let deps = deps_of(params, pos);
        let filled: Vec<bool> = deps
            .iter()
            .map(|&d| !machine.heap.ctx(exemplar).slot(d + 1).is_unset())
            .collect();
        let all = filled.iter().all(|&f| f);
        let any = filled.iter().any(|&f| f);
        let slot_value = *machine.heap.ctx(exemplar).slot(pos + 1);
        let name = machine.interner.spelling(params[pos].symbol).to_owned();
        match slot_value {
            Value::PartialRefinement { .. } => {
                if deps.is_empty() || all {
                    machine.heap.ctx_mut(exemplar).set_slot(pos + 1, Value::Logic(true));
                } else if any {
                    return Err(RunError::fail(
                        ErrorId::PartialSpecialization,
                        format!("refinement {name} was given only some of its arguments"),
                    ));
                }
                // No args at all: stays partial, ordering preserved.
            }
            Value::Unset => {
                if any && all && !deps.is_empty() {
                    machine.heap.ctx_mut(exemplar).set_slot(pos + 1, Value::Logic(true));
                } else if any && !all {
                    return Err(RunError::fail(
                        ErrorId::PartialSpecialization,
                        format!("refinement {name} was given only some of its arguments"),
                    ));
                }
            }
            explicit => {
                // The def block set the refinement slot directly.
                if explicit.is_truthy() {
                    if !deps.is_empty() && !all {
                        return Err(RunError::fail(
                            ErrorId::PartialSpecialization,
                            format!("refinement {name} enabled without its arguments"),
                        ));
                    }
                    machine.heap.ctx_mut(exemplar).set_slot(pos + 1, Value::Logic(true));
                } else {
                    machine.heap.ctx_mut(exemplar).set_slot(pos + 1, Value::Null);
                    for &d in &deps {
                        machine.heap.ctx_mut(exemplar).set_slot(d + 1, Value::Null);
                    }
                }
            }
        }
    }
    Ok(())
}

fn deps_of(params: &[crate::action::Param], refinement_pos: usize) -> Vec<usize> {
    let mut deps = Vec::new();
    for (pos, param) in params.iter().enumerate().skip(refinement_pos + 1) {
        match param.class {
            ParamClass::Refinement => break,
            ParamClass::Local => continue,
            _ => deps.push(pos),
        }
    }
    deps
}

fn adapt_native(machine: &mut Machine, frame: HeapId) -> RunResult<Option<Value>> {
    let target = machine.arg(frame, 0);
    let prelude = block_arg(machine, frame, 1)?;
    let (act, refinements) = machine.path_to_action(&target, Specifier::NONE)?;
    if !refinements.is_empty() {
        return Err(RunError::fail(
            ErrorId::BadSpecializee,
            "adapt takes a plain action; specialize first, then adapt",
        ));
    }
    let (core, exemplar) = resolve_specialized(&machine.heap, act.action);
    if exemplar.is_some() {
        return Err(RunError::fail(
            ErrorId::BadSpecializee,
            "adapt a specialization by specializing the adapted action instead",
        ));
    }
    let params = machine.heap.action_body(core).params.clone();
    let param_syms: Vec<SymbolId> = params.iter().map(|p| p.symbol).collect();
    let prelude_spec = Specifier::NONE.derive(&prelude.binding);
    let copied = copy_derelativized(&mut machine.heap, prelude.series, prelude.index, prelude_spec)?;
    let name = machine.heap.action_body(core).name;
    let action = machine.heap.alloc(HeapData::Action(ActionBody {
        params,
        dispatcher: Dispatcher::Adapted {
            prelude: copied,
            base: core,
        },
        meta: None,
        name,
        enfix: false,
        returns: None,
    }))?;
    relativize_body(&mut machine.heap, &mut machine.interner, copied, action, &param_syms);
    Ok(Some(Value::action(action)))
}

fn chain_native(machine: &mut Machine, frame: HeapId) -> RunResult<Option<Value>> {
    let block = block_arg(machine, frame, 0)?;
    let mut pipeline: SmallVec<[HeapId; 2]> = SmallVec::new();
    let mut feed = Feed::for_seq(&block, Specifier::NONE);
    while !feed.at_end(&machine.heap) {
        if let Some(value) = machine.eval_step(&mut feed, false)? {
            let Value::Action(act) = value else {
                return Err(RunError::fail(
                    ErrorId::BadSpecializee,
                    format!("chain pipeline entries must be actions, found {}", value.kind()),
                ));
            };
            pipeline.push(act.action);
        }
    }
    if pipeline.is_empty() {
        return Err(RunError::fail(ErrorId::BadSpecializee, "chain needs at least one action"));
    }
    let (first_core, _) = resolve_specialized(&machine.heap, pipeline[0]);
    let params = machine.heap.action_body(first_core).params.clone();
    let name = machine.heap.action_body(first_core).name;
    Ok(Some(Value::action(machine.heap.alloc(HeapData::Action(ActionBody {
        params,
        dispatcher: Dispatcher::Chained { pipeline },
        meta: None,
        name,
        enfix: false,
        returns: None,
    }))?)))
}

fn make_native(machine: &mut Machine, frame: HeapId) -> RunResult<Option<Value>> {
    let type_value = machine.arg(frame, 0);
    let def = machine.arg(frame, 1);
    match type_value {
        Value::Datatype(Kind::Object) | Value::Datatype(Kind::Error) | Value::Datatype(Kind::Module) => {
            let kind = match type_value {
                Value::Datatype(Kind::Error) => CtxKind::Error,
                Value::Datatype(Kind::Module) => CtxKind::Module,
                _ => CtxKind::Object,
            };
            let Value::Seq(body) = def else {
                return Err(RunError::fail(ErrorId::BadMake, "context construction needs a block"));
            };
            make_object(machine, kind, &body).map(Some)
        }
        Value::Context(parent) => {
            // Derivation: child of the parent, then the block overlays.
            let Value::Seq(body) = def else {
                return Err(RunError::fail(ErrorId::BadMake, "derivation needs a block"));
            };
            let child = derive_context(&mut machine.heap, parent.varlist)?;
            let body_spec = Specifier::NONE.derive(&body.binding);
            let copied = copy_derelativized(&mut machine.heap, body.series, body.index, body_spec)?;
            for symbol in collect_set_words(&machine.heap, copied, false) {
                if find_slot(&machine.heap, &machine.interner, child, symbol).is_none() {
                    crate::context::append_slot(&mut machine.heap, child, symbol);
                }
            }
            bind_to_context(&mut machine.heap, &mut machine.interner, copied, child);
            let seq = Seq::new(SeqKind::Block, copied);
            machine.eval_seq(&seq, Specifier::NONE)?;
            Ok(Some(Value::Context(CtxRef {
                kind: parent.kind,
                varlist: child,
            })))
        }
        Value::Datatype(Kind::Map) => {
            let Value::Seq(body) = def else {
                return Err(RunError::fail(ErrorId::BadMake, "map construction needs a block"));
            };
            let pairs: Vec<Value> = machine.heap.array(body.series).slice_from(body.index).to_vec();
            if pairs.len() % 2 != 0 {
                return Err(RunError::fail(ErrorId::BadMake, "map construction needs key/value pairs"));
            }
            let id = crate::map::make_map(&mut machine.heap, &machine.interner, pairs)?;
            Ok(Some(Value::Map(id)))
        }
        Value::Datatype(Kind::Block) => match def {
            Value::Integer(_) => {
                let id = machine.heap.alloc(HeapData::Array(crate::series::Array::new()))?;
                Ok(Some(Value::block(id)))
            }
            Value::Seq(s) => {
                let copied = copy_derelativized(&mut machine.heap, s.series, s.index, Specifier::NONE)?;
                Ok(Some(Value::block(copied)))
            }
            other => Err(RunError::fail(
                ErrorId::BadMake,
                format!("cannot make block! from {}", other.kind()),
            )),
        },
        Value::Datatype(Kind::Frame) => {
            let Value::Action(act) = def else {
                return Err(RunError::fail(ErrorId::BadMake, "make frame! needs an action"));
            };
            let (core, exemplar) = resolve_specialized(&machine.heap, act.action);
            let fresh = make_frame(&mut machine.heap, core)?;
            if let Some(base) = exemplar {
                let vars = machine.heap.ctx(base).vars.clone();
                for (slot, value) in vars.iter().enumerate().skip(1) {
                    if !matches!(value, Value::PartialRefinement { .. }) {
                        machine.heap.ctx_mut(fresh).set_slot(slot, *value);
                    }
                }
            }
            reify_frame(&mut machine.heap, fresh);
            Ok(Some(Value::frame(fresh)))
        }
        Value::Datatype(Kind::Event) => {
            let Value::Seq(body) = def else {
                return Err(RunError::fail(ErrorId::BadMake, "event construction needs a block"));
            };
            make_event(machine, &body).map(Some)
        }
        Value::Datatype(Kind::Bitset) => {
            let mut bitset = BitsetData::default();
            match def {
                Value::Binary(b) => bitset.bits = machine.heap.binary(b.series).slice_from(b.index).to_vec(),
                Value::Integer(n) => bitset.bits = vec![0; ((n.max(0) as usize) + 7) / 8],
                other => {
                    return Err(RunError::fail(
                        ErrorId::BadMake,
                        format!("cannot make bitset! from {}", other.kind()),
                    ));
                }
            }
            let id = machine.heap.alloc(HeapData::Bitset(bitset))?;
            Ok(Some(Value::Bitset(id)))
        }
        other => Err(RunError::fail(
            ErrorId::BadMake,
            format!("make does not understand {}", other.kind()),
        )),
    }
}

/// Event construction: a literal block of `field: value` pairs, matching
/// the molded form. Fields cross by name, never by bit layout.
fn make_event(machine: &mut Machine, body: &Seq) -> RunResult<Value> {
    let cells: Vec<Value> = machine.heap.array(body.series).slice_from(body.index).to_vec();
    if cells.len() % 2 != 0 {
        return Err(RunError::fail(ErrorId::BadMake, "event construction needs field/value pairs"));
    }
    let mut event = Event {
        etype: EventType::Custom,
        code: 0,
        data: 0,
    };
    for pair in cells.chunks_exact(2) {
        let Value::Word(field) = pair[0] else {
            return Err(RunError::fail(ErrorId::BadMake, "event fields are named by set-words"));
        };
        if field.kind != WordKind::Set {
            return Err(RunError::fail(ErrorId::BadMake, "event fields are named by set-words"));
        }
        match machine.interner.spelling(field.symbol).to_ascii_lowercase().as_str() {
            "type" => {
                let Value::Word(w) = pair[1] else {
                    return Err(RunError::fail(ErrorId::BadMake, "event type takes a word"));
                };
                event.etype = machine
                    .interner
                    .spelling(w.symbol)
                    .parse()
                    .map_err(|_| RunError::fail(ErrorId::BadMake, "unknown event type"))?;
            }
            "code" => {
                let Value::Integer(n) = pair[1] else {
                    return Err(RunError::fail(ErrorId::BadMake, "event code takes an integer"));
                };
                event.code = u32::try_from(n)
                    .map_err(|_| RunError::fail(ErrorId::BadMake, "event code out of range"))?;
            }
            "data" => {
                let Value::Integer(n) = pair[1] else {
                    return Err(RunError::fail(ErrorId::BadMake, "event data takes an integer"));
                };
                event.data = n;
            }
            field => {
                return Err(RunError::fail(ErrorId::BadMake, format!("{field} is not an event field")));
            }
        }
    }
    Ok(Value::Event(event))
}

/// Object construction: collect top-level set-words into a fresh context,
/// bind a copy of the body into it, evaluate.
pub(crate) fn make_object(machine: &mut Machine, kind: CtxKind, body: &Seq) -> RunResult<Value> {
    let body_spec = Specifier::NONE.derive(&body.binding);
    let copied = copy_derelativized(&mut machine.heap, body.series, body.index, body_spec)?;
    let symbols = collect_set_words(&machine.heap, copied, false);
    let ctx = make_context(&mut machine.heap, kind, &symbols)?;
    bind_to_context(&mut machine.heap, &mut machine.interner, copied, ctx);
    let seq = Seq::new(SeqKind::Block, copied);
    machine.eval_seq(&seq, Specifier::NONE)?;
    Ok(Value::Context(CtxRef { kind, varlist: ctx }))
}

fn bind_native(machine: &mut Machine, frame: HeapId) -> RunResult<Option<Value>> {
    let value = machine.arg(frame, 0);
    let context = machine.arg(frame, 1);
    let ctx_id = match context {
        Value::Context(c) => c.varlist,
        Value::Word(w) => {
            let (varlist, _) = bind::resolve_binding(&machine.heap, &w.binding, Specifier::NONE)?;
            varlist
        }
        other => {
            return Err(RunError::fail(
                ErrorId::InvalidArg,
                format!("bind cannot target a {}", other.kind()),
            ));
        }
    };
    match value {
        Value::Seq(s) => {
            bind_to_context(&mut machine.heap, &mut machine.interner, s.series, ctx_id);
            Ok(Some(value))
        }
        Value::Word(mut w) => {
            if let Some(slot) = find_slot(&machine.heap, &machine.interner, ctx_id, w.symbol) {
                w.binding = Binding::Context {
                    ctx: ctx_id,
                    index: slot as u32,
                };
            }
            Ok(Some(Value::Word(w)))
        }
        other => Err(RunError::fail(
            ErrorId::InvalidArg,
            format!("bind cannot rebind a {}", other.kind()),
        )),
    }
}

fn words_of(machine: &mut Machine, frame: HeapId) -> RunResult<Option<Value>> {
    let value = machine.arg(frame, 0);
    let words: Vec<Value> = match value {
        Value::Context(c) => crate::context::context_keys(&machine.heap, c.varlist)
            .iter()
            .filter(|key| !key.hidden)
            .map(|key| Value::word(WordKind::Plain, key.symbol))
            .collect(),
        Value::Action(a) => machine
            .heap
            .action_body(a.action)
            .visible_params()
            .map(|(_, p)| Value::word(WordKind::Plain, p.symbol))
            .collect(),
        Value::Map(id) => crate::map::map_keys(&machine.heap, id),
        other => {
            return Err(RunError::fail(
                ErrorId::InvalidArg,
                format!("words-of cannot reflect a {}", other.kind()),
            ));
        }
    };
    let id = machine.heap.alloc(HeapData::Array(crate::series::Array::from_values(words)))?;
    Ok(Some(Value::block(id)))
}

fn values_of(machine: &mut Machine, frame: HeapId) -> RunResult<Option<Value>> {
    let value = machine.arg(frame, 0);
    let values: Vec<Value> = match value {
        Value::Context(c) => {
            let ctx = machine.heap.ctx(c.varlist);
            if ctx.inaccessible {
                return Err(RunError::fail(ErrorId::Inaccessible, "context frame has ended"));
            }
            ctx.vars
                .iter()
                .skip(1)
                .map(|v| if v.is_unset() { Value::Null } else { *v })
                .collect()
        }
        Value::Map(id) => crate::map::map_values(&machine.heap, id),
        other => {
            return Err(RunError::fail(
                ErrorId::InvalidArg,
                format!("values-of cannot reflect a {}", other.kind()),
            ));
        }
    };
    let id = machine.heap.alloc(HeapData::Array(crate::series::Array::from_values(values)))?;
    Ok(Some(Value::block(id)))
}

fn binding_of(machine: &mut Machine, frame: HeapId) -> RunResult<Option<Value>> {
    let Value::Word(w) = machine.arg(frame, 0) else {
        return Err(RunError::fail(ErrorId::InvalidArg, "binding-of needs a word"));
    };
    match w.binding {
        Binding::Unbound | Binding::Relative { .. } => Ok(Some(Value::Null)),
        Binding::Context { ctx, .. } => {
            let kind = machine.heap.ctx(ctx).kind;
            if kind == CtxKind::Frame {
                // Reflection makes the frame first-class; it must now
                // survive its invocation.
                reify_frame(&mut machine.heap, ctx);
            }
            Ok(Some(Value::Context(CtxRef { kind, varlist: ctx })))
        }
    }
}

fn set_series_flag(
    machine: &mut Machine,
    value: &Value,
    set: impl Fn(&mut crate::series::SeriesFlags),
) -> RunResult<()> {
    match value {
        Value::Seq(s) => set(&mut machine.heap.array_mut(s.series).flags),
        Value::Strand(s) => set(&mut machine.heap.text_mut(s.series).flags),
        Value::Binary(b) => set(&mut machine.heap.binary_mut(b.series).flags),
        other => {
            return Err(RunError::fail(
                ErrorId::InvalidArg,
                format!("cannot protect a {}", other.kind()),
            ));
        }
    }
    Ok(())
}

fn lock_value(machine: &mut Machine, value: &Value, deep: bool) -> RunResult<()> {
    match value {
        Value::Seq(s) => {
            machine.heap.array_mut(s.series).flags.frozen = true;
            if deep {
                let cells: Vec<Value> = machine.heap.array(s.series).as_slice().to_vec();
                for cell in cells {
                    if matches!(cell, Value::Seq(_) | Value::Strand(_) | Value::Binary(_)) {
                        lock_value(machine, &cell, true)?;
                    }
                }
            }
        }
        Value::Strand(s) => machine.heap.text_mut(s.series).flags.frozen = true,
        Value::Binary(b) => machine.heap.binary_mut(b.series).flags.frozen = true,
        Value::Context(c) => {
            let len = machine.heap.ctx(c.varlist).vars.len();
            if deep {
                for slot in 1..len {
                    let cell = *machine.heap.ctx(c.varlist).slot(slot);
                    if matches!(cell, Value::Seq(_) | Value::Strand(_) | Value::Binary(_)) {
                        lock_value(machine, &cell, true)?;
                    }
                }
            }
        }
        other => {
            return Err(RunError::fail(
                ErrorId::InvalidArg,
                format!("cannot lock a {}", other.kind()),
            ));
        }
    }
    Ok(())
}
