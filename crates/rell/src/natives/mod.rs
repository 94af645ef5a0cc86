//! The native library: built-in actions dispatched by enum.
//!
//! Each native declares its parameters as a spec-block string scanned by
//! the ordinary scanner at startup, so natives and user functions share one
//! paramlist pipeline. Enfix operator forms reuse the same dispatch enum
//! under their operator spellings.

mod control;
mod definition;
mod math;
mod series_ops;
mod system;

use serde::{Deserialize, Serialize};
use strum::{EnumIter, IntoEnumIterator, IntoStaticStr};

use crate::{
    action::{ActionBody, Dispatcher, parse_param_spec},
    context::{append_slot, make_context},
    error::RunResult,
    eval::Machine,
    heap::{Heap, HeapData, HeapId},
    intern::Interner,
    scan::scan_source,
    value::{CtxKind, Kind, Seq, SeqKind, Value},
};

/// Every built-in action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr, EnumIter, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case")]
pub enum Native {
    // control flow
    If,
    Either,
    Any,
    All,
    Reduce,
    Do,
    Catch,
    Throw,
    Try,
    Trap,
    Fail,
    Return,
    Quit,
    Halt,
    Comment,
    Elide,
    Recycle,
    // definition and reflection
    Func,
    Does,
    Specialize,
    Adapt,
    Chain,
    Hijack,
    Make,
    Bind,
    WordsOf,
    ValuesOf,
    TypeOf,
    BindingOf,
    Get,
    Set,
    #[strum(serialize = "in")]
    InCtx,
    Protect,
    Lock,
    // series
    Copy,
    Pick,
    Poke,
    Insert,
    Append,
    LengthOf,
    IndexOf,
    #[strum(serialize = "head")]
    HeadOf,
    #[strum(serialize = "tail")]
    TailOf,
    #[strum(serialize = "next")]
    NextOf,
    #[strum(serialize = "back")]
    BackOf,
    Skip,
    Take,
    First,
    Last,
    Find,
    Select,
    Put,
    // math and comparison
    Add,
    Subtract,
    Multiply,
    Divide,
    Negate,
    #[strum(serialize = "equal?")]
    Equal,
    #[strum(serialize = "not-equal?")]
    NotEqual,
    #[strum(serialize = "lesser?")]
    Lesser,
    #[strum(serialize = "greater?")]
    Greater,
    #[strum(serialize = "lesser-or-equal?")]
    LesserEqual,
    #[strum(serialize = "greater-or-equal?")]
    GreaterEqual,
    Not,
    // molding, scanning, system
    Print,
    Probe,
    Mold,
    Form,
    Load,
    ToLocalFile,
    ToRellFile,
    Deflate,
    Inflate,
    Gzip,
    Gunzip,
    Zdeflate,
    Zinflate,
}

impl Native {
    /// The lib word this native binds to.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Parameter spec, in ordinary spec-block grammar.
    #[must_use]
    pub fn spec(self) -> &'static str {
        match self {
            Self::If => "condition [any-value! null!] branch [block!]",
            Self::Either => "condition [any-value! null!] true-branch [block!] false-branch [block!]",
            Self::Any | Self::All | Self::Try | Self::Trap => "block [block!]",
            Self::Reduce => "block [block!]",
            Self::Do => "source [block! group! text! action! frame!]",
            Self::Catch => "block [block!] /name name-word [word! block!] /any /quit",
            Self::Throw => "value [any-value! null!] /name word [word!]",
            Self::Fail => "reason [text! word! error!]",
            Self::Return => "value [any-value! null!]",
            Self::Quit => "/with value [any-value!]",
            Self::Halt | Self::Recycle => "",
            Self::Comment => "'discarded [any-value!]",
            Self::Elide => "discarded [any-value! null!]",
            Self::Func => "spec [block!] body [block!]",
            Self::Does => "body [block!]",
            Self::Specialize => "target [word! path! action!] def [block!]",
            Self::Adapt => "target [word! path! action!] prelude [block!]",
            Self::Chain => "pipeline [block!]",
            Self::Hijack => "victim [word! path! action!] usurper [word! path! action!]",
            Self::Make => "type [datatype! object! module! error!] def [any-value!]",
            Self::Bind => "value [block! word!] context [object! module! frame! error! port! word!]",
            Self::WordsOf => "value [object! module! frame! error! port! action! map!]",
            Self::ValuesOf => "value [object! module! frame! error! port! map!]",
            Self::TypeOf => "value [any-value! null!]",
            Self::BindingOf => "word [word!]",
            Self::Get => "source [word! path!]",
            Self::Set => "target [word! path!] value [any-value! null!]",
            Self::InCtx => "context [object! module! frame!] word [word!]",
            Self::Protect => "value [block! text! binary!]",
            Self::Lock => "value [block! text! binary! object!] /deep",
            Self::Copy => "value [block! group! path! text! binary! map! object!] /part limit [integer!] /deep",
            Self::Pick => "series [block! group! path! text! binary! map! tuple! pair! date! object! quoted!] \
                           index [integer! word!]",
            Self::Poke => "series [block! group! binary!] index [integer!] value [any-value! null!]",
            Self::Insert | Self::Append => {
                "series [block! group! text! binary!] value [any-value!] \
                 /part limit [integer!] /dup count [integer!] /only"
            }
            Self::LengthOf => "series [block! group! path! text! binary! map! object! blank!]",
            Self::IndexOf | Self::HeadOf | Self::TailOf | Self::NextOf | Self::BackOf => {
                "series [block! group! path! text! binary!]"
            }
            Self::Skip => "series [block! group! path! text! binary!] count [integer!]",
            Self::Take => "series [block! text! binary!] /last",
            Self::First | Self::Last => "series [block! group! path! text! binary! tuple! pair!]",
            Self::Find => "series [block! group! text!] value [any-value!]",
            Self::Select => "series [block! map! object!] key [any-value!]",
            Self::Put => "target [map!] key [any-value!] value [any-value! null!]",
            Self::Add | Self::Subtract | Self::Multiply | Self::Divide => {
                "value1 [integer! decimal! pair! time! date!] value2 [integer! decimal! pair! time!]"
            }
            Self::Negate => "value [integer! decimal! pair! time!]",
            Self::Equal | Self::NotEqual => "value1 [any-value! null!] value2 [any-value! null!]",
            Self::Lesser | Self::Greater | Self::LesserEqual | Self::GreaterEqual => {
                "value1 [integer! decimal! char! time! date! text!] value2 [integer! decimal! char! time! date! text!]"
            }
            Self::Not => "value [any-value! null!]",
            Self::Print | Self::Probe | Self::Mold | Self::Form => "value [any-value! null!]",
            Self::Load => "source [text!]",
            Self::ToLocalFile => "path [file! text!] /full",
            Self::ToRellFile => "path [text! file!]",
            Self::Deflate | Self::Gzip | Self::Zdeflate => "data [binary! text!]",
            Self::Inflate | Self::Gunzip | Self::Zinflate => "data [binary!] /max limit [integer!]",
        }
    }

    /// Dispatches a filled frame. `Ok(None)` means the call was invisible.
    pub fn call(self, machine: &mut Machine, frame: HeapId) -> RunResult<Option<Value>> {
        match self {
            Self::If
            | Self::Either
            | Self::Any
            | Self::All
            | Self::Reduce
            | Self::Do
            | Self::Catch
            | Self::Throw
            | Self::Try
            | Self::Trap
            | Self::Fail
            | Self::Return
            | Self::Quit
            | Self::Halt
            | Self::Comment
            | Self::Elide
            | Self::Recycle => control::call(self, machine, frame),
            Self::Func
            | Self::Does
            | Self::Specialize
            | Self::Adapt
            | Self::Chain
            | Self::Hijack
            | Self::Make
            | Self::Bind
            | Self::WordsOf
            | Self::ValuesOf
            | Self::TypeOf
            | Self::BindingOf
            | Self::Get
            | Self::Set
            | Self::InCtx
            | Self::Protect
            | Self::Lock => definition::call(self, machine, frame),
            Self::Copy
            | Self::Pick
            | Self::Poke
            | Self::Insert
            | Self::Append
            | Self::LengthOf
            | Self::IndexOf
            | Self::HeadOf
            | Self::TailOf
            | Self::NextOf
            | Self::BackOf
            | Self::Skip
            | Self::Take
            | Self::First
            | Self::Last
            | Self::Find
            | Self::Select
            | Self::Put => series_ops::call(self, machine, frame),
            Self::Add
            | Self::Subtract
            | Self::Multiply
            | Self::Divide
            | Self::Negate
            | Self::Equal
            | Self::NotEqual
            | Self::Lesser
            | Self::Greater
            | Self::LesserEqual
            | Self::GreaterEqual
            | Self::Not => math::call(self, machine, frame),
            Self::Print
            | Self::Probe
            | Self::Mold
            | Self::Form
            | Self::Load
            | Self::ToLocalFile
            | Self::ToRellFile
            | Self::Deflate
            | Self::Inflate
            | Self::Gzip
            | Self::Gunzip
            | Self::Zdeflate
            | Self::Zinflate => system::call(self, machine, frame),
        }
    }
}

/// Enfix operator spellings and the natives behind them.
const OPERATORS: &[(&str, Native)] = &[
    ("+", Native::Add),
    ("-", Native::Subtract),
    ("*", Native::Multiply),
    ("/", Native::Divide),
    ("=", Native::Equal),
    ("<>", Native::NotEqual),
    ("<", Native::Lesser),
    (">", Native::Greater),
    ("<=", Native::LesserEqual),
    (">=", Native::GreaterEqual),
];

/// Builds the lib and user contexts: datatype words, constants, every
/// native, and the enfix operator forms.
pub fn install_lib(heap: &mut Heap, interner: &mut Interner) -> RunResult<(HeapId, HeapId)> {
    let lib = make_context(heap, CtxKind::Module, &[])?;
    let user = make_context(heap, CtxKind::Module, &[])?;

    // Datatype words: integer! -> the datatype value.
    for bit in 0..64u8 {
        if let Some(kind) = Kind::from_repr(bit) {
            let sym = interner.intern(<&'static str>::from(kind));
            let slot = append_slot(heap, lib, sym);
            heap.ctx_mut(lib).set_slot(slot, Value::Datatype(kind));
        }
    }

    // Word constants.
    for (name, value) in [
        ("true", Value::Logic(true)),
        ("false", Value::Logic(false)),
        ("on", Value::Logic(true)),
        ("off", Value::Logic(false)),
        ("yes", Value::Logic(true)),
        ("no", Value::Logic(false)),
        ("null", Value::Null),
        ("blank", Value::Blank),
    ] {
        let sym = interner.intern(name);
        let slot = append_slot(heap, lib, sym);
        heap.ctx_mut(lib).set_slot(slot, value);
    }

    // Natives under their own names.
    for native in Native::iter() {
        let action = make_native_action(heap, interner, native, native.name(), false)?;
        let sym = interner.intern(native.name());
        let slot = append_slot(heap, lib, sym);
        heap.ctx_mut(lib).set_slot(slot, Value::action(action));
    }

    // Enfix operator forms.
    for &(spelling, native) in OPERATORS {
        let action = make_native_action(heap, interner, native, spelling, true)?;
        let sym = interner.intern(spelling);
        let slot = append_slot(heap, lib, sym);
        heap.ctx_mut(lib).set_slot(slot, Value::action(action));
    }

    Ok((lib, user))
}

fn make_native_action(
    heap: &mut Heap,
    interner: &mut Interner,
    native: Native,
    name: &str,
    enfix: bool,
) -> RunResult<HeapId> {
    let spec_src = format!("[{}]", native.spec());
    let spec_block = scan_source(heap, interner, &spec_src, None)?;
    let spec_seq = match heap.array(spec_block).get(0).copied() {
        Some(Value::Seq(seq)) if seq.kind == SeqKind::Block => seq,
        _ => Seq::new(SeqKind::Block, spec_block),
    };
    let mut params = parse_param_spec(heap, interner, &spec_seq)?;
    if enfix {
        // Operator arguments are tight: no enfix lookahead of their own,
        // so chains of operators associate left-to-right.
        for param in &mut params {
            if matches!(param.class, crate::action::ParamClass::Normal) {
                param.class = crate::action::ParamClass::Tight;
            }
        }
    }
    let name_sym = interner.intern(name);
    Ok(heap.alloc(HeapData::Action(ActionBody {
        params,
        dispatcher: Dispatcher::Native(native),
        meta: None,
        name: Some(name_sym),
        enfix,
        returns: None,
    }))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Tracker;

    #[test]
    fn every_native_spec_parses() {
        let mut heap = Heap::new(Tracker::NoLimit);
        let mut interner = Interner::new();
        for native in Native::iter() {
            let result = make_native_action(&mut heap, &mut interner, native, native.name(), false);
            assert!(result.is_ok(), "spec for {} failed to parse", native.name());
        }
    }

    #[test]
    fn install_binds_natives_and_datatypes() {
        let mut heap = Heap::new(Tracker::NoLimit);
        let mut interner = Interner::new();
        let (lib, _user) = install_lib(&mut heap, &mut interner).unwrap();
        let append = interner.intern("append");
        let slot = crate::context::find_slot(&heap, &interner, lib, append).expect("append installed");
        assert!(matches!(heap.ctx(lib).slot(slot), Value::Action(_)));

        let int_type = interner.intern("integer!");
        let slot = crate::context::find_slot(&heap, &interner, lib, int_type).expect("integer! installed");
        assert!(matches!(heap.ctx(lib).slot(slot), Value::Datatype(Kind::Integer)));

        let plus = interner.intern("+");
        let slot = crate::context::find_slot(&heap, &interner, lib, plus).expect("+ installed");
        let Value::Action(act) = heap.ctx(lib).slot(slot) else {
            panic!()
        };
        assert!(heap.action_body(act.action).enfix, "+ is enfix");
    }
}
