use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

pub mod program;
pub mod upvalue;

pub use program::{CaptureRef, CodeAddr, FuncProto, Program, SymbolRef};
pub use upvalue::{ClosureContext, Frame, UpvalueCell};

use upvalue::resolve_captures;

use super::executor::{DummyExecutor, Executor};
use super::value::{Table, Value};
use super::{Error, ErrorKind, InternalError};
use crate::interner::Symbol;

static INSTANCE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Non-owning identity of one interpreter instance. Closures carry it so a
/// call under a foreign instance can be rejected by a plain equality check;
/// it is never traversed for ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(u64);

impl InstanceId {
    fn fresh() -> Self {
        Self(INSTANCE_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// First-class function value: a bytecode entry point bound to one closure
/// context and to the instance that created it. Immutable after
/// construction; passed around as `Rc<Closure>`, and two closures are the
/// same callable only if they are the same object.
#[derive(Debug)]
pub struct Closure {
    proto_index: usize,
    entry: CodeAddr,
    context: ClosureContext,
    owner: InstanceId,
}

impl Closure {
    pub fn proto_index(&self) -> usize {
        self.proto_index
    }
    pub fn entry(&self) -> CodeAddr {
        self.entry
    }
    pub fn context(&self) -> &ClosureContext {
        &self.context
    }
    pub fn owner(&self) -> InstanceId {
        self.owner
    }
}

/// One interpreter instance: the unit of execution and of ownership
/// isolation. All state reachable from a machine is single-threaded from its
/// perspective; independent machines share nothing.
pub struct Machine {
    id: InstanceId,
    env: Table,
    executor: Rc<dyn Executor>,
}

impl Machine {
    pub fn new(executor: Rc<dyn Executor>) -> Self {
        Self {
            id: InstanceId::fresh(),
            env: Table::new(),
            executor,
        }
    }
    pub fn new_without_executor() -> Self {
        Self::new(Rc::new(DummyExecutor))
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }
    /// The instance's default environment table, where globals live.
    pub fn env(&self) -> &Table {
        &self.env
    }
    pub fn get_global(&self, name: Symbol) -> Value {
        self.env.get(name)
    }
    pub fn set_global(&self, name: Symbol, value: Value) {
        self.env.set(name, value);
    }

    /// The closure factory, run when a function-literal instruction is
    /// reached inside `frame` while `enclosing` is the running closure's
    /// context. Resolves the literal's captures to cells and binds them into
    /// a new closure owned by this instance.
    pub fn instantiate(
        &self,
        prog: &Program,
        fn_index: usize,
        frame: &mut Frame,
        enclosing: &ClosureContext,
    ) -> Result<Rc<Closure>, Error> {
        let proto = prog.get_proto(fn_index).ok_or_else(|| {
            Error::new(ErrorKind::Internal(InternalError::UnknownFunction {
                index: fn_index,
            }))
        })?;
        validate_symbols(proto)?;
        let context = resolve_captures(proto, frame, enclosing)?;
        log::debug!(
            "closure instantiated at {} with {} upvalue(s)",
            proto.entry,
            context.len()
        );
        Ok(Rc::new(Closure {
            proto_index: fn_index,
            entry: proto.entry,
            context,
            owner: self.id,
        }))
    }

    /// Invoke a closure. Rejects closures created by another instance before
    /// touching any state, then builds the activation and hands control to
    /// the executor.
    pub fn call(
        &mut self,
        prog: &Program,
        closure: &Rc<Closure>,
        args: &[Value],
    ) -> Result<Value, Error> {
        if closure.owner != self.id {
            return Err(Error::at(
                ErrorKind::ForeignClosure {
                    owner: closure.owner,
                    current: self.id,
                },
                closure.entry,
            ));
        }
        let proto = prog.get_proto(closure.proto_index).ok_or_else(|| {
            Error::internal(
                InternalError::UnknownFunction {
                    index: closure.proto_index,
                },
                closure.entry,
            )
        })?;
        let frame = Frame::for_call(proto, args);
        // the handle is cloned out first so the executor can re-enter the
        // machine through the activation
        let executor = self.executor.clone();
        let mut activation = Activation {
            machine: self,
            prog,
            proto_index: closure.proto_index,
            frame,
            context: closure.context.clone(),
        };
        executor.run(closure.entry, &mut activation)
    }

    /// Instantiate and run a table entry with no enclosing frame. The entry
    /// function of a program captures nothing, so the root frame stays empty.
    pub fn execute_idx(&mut self, prog: &Program, idx: usize) -> Result<Value, Error> {
        let mut root = Frame::new(0);
        let closure = self.instantiate(prog, idx, &mut root, &ClosureContext::empty())?;
        self.call(prog, &closure, &[])
    }
    pub fn execute_main(&mut self, prog: &Program) -> Result<Value, Error> {
        self.execute_idx(prog, 0)
    }
}

// Compiler metadata is trusted but not blindly: an upvalue reference beyond
// the capture list would index past every context built from this proto.
fn validate_symbols(proto: &FuncProto) -> Result<(), Error> {
    for sym in proto.symbols.iter() {
        if let SymbolRef::Upvalue(index) = *sym {
            if index >= proto.captures.len() {
                return Err(Error::internal(
                    InternalError::UpvalueOutOfRange {
                        index,
                        context_len: proto.captures.len(),
                    },
                    proto.entry,
                ));
            }
        }
    }
    Ok(())
}

/// Scoped capability handed to the executor for the duration of one call:
/// locals (through the promotion redirect), the closure's upvalues, the
/// environment, nested calls and closure instantiation. It performs no
/// control flow of its own.
pub struct Activation<'a> {
    machine: &'a mut Machine,
    prog: &'a Program,
    proto_index: usize,
    frame: Frame,
    context: ClosureContext,
}

impl Activation<'_> {
    pub fn proto(&self) -> &FuncProto {
        &self.prog.fn_table[self.proto_index].1
    }

    pub fn local(&self, slot: usize) -> Value {
        self.frame.get(slot)
    }
    pub fn set_local(&mut self, slot: usize, value: Value) {
        self.frame.set(slot, value);
    }

    pub fn upvalue(&self, index: usize) -> Value {
        self.context.get(index)
    }
    pub fn set_upvalue(&mut self, index: usize, value: Value) {
        self.context.set(index, value);
    }

    pub fn global(&self, name: Symbol) -> Value {
        self.machine.get_global(name)
    }
    pub fn set_global(&mut self, name: Symbol, value: Value) {
        self.machine.set_global(name, value);
    }

    /// Read through a symbol descriptor, whatever its classification.
    pub fn load(&self, sym: SymbolRef) -> Value {
        match sym {
            SymbolRef::Local(slot) => self.local(slot),
            SymbolRef::Upvalue(index) => self.upvalue(index),
            SymbolRef::Global(name) => self.global(name),
            SymbolRef::DefaultEnv => Value::Table(self.machine.env.clone()),
        }
    }

    /// Write through a symbol descriptor. The default environment itself is
    /// not assignable; a compiler emitting such a store is defective.
    pub fn store(&mut self, sym: SymbolRef, value: Value) -> Result<(), Error> {
        match sym {
            SymbolRef::Local(slot) => self.set_local(slot, value),
            SymbolRef::Upvalue(index) => self.set_upvalue(index, value),
            SymbolRef::Global(name) => self.set_global(name, value),
            SymbolRef::DefaultEnv => {
                return Err(Error::internal(
                    InternalError::EnvironmentNotAssignable,
                    self.proto().entry,
                ))
            }
        }
        Ok(())
    }

    /// Evaluate a function literal: run capture resolution against this
    /// frame and context and produce the closure as a value.
    pub fn make_closure(&mut self, fn_index: usize) -> Result<Value, Error> {
        let closure =
            self.machine
                .instantiate(self.prog, fn_index, &mut self.frame, &self.context)?;
        Ok(Value::Function(closure))
    }

    /// Call a value from inside the body. Non-functions fail on the ordinary
    /// script-level channel.
    pub fn call(&mut self, callee: &Value, args: &[Value]) -> Result<Value, Error> {
        match callee {
            Value::Function(closure) => self.machine.call(self.prog, closure, args),
            other => Err(Error::new(ErrorKind::NotCallable(other.type_name()))),
        }
    }
}
