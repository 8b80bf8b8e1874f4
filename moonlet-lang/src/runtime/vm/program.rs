use itertools::Itertools;

use crate::interner::Symbol;

/// Bytecode entry address inside the (externally owned) code segment. The
/// closure engine never dereferences it; it only threads it from compiled
/// metadata to the executor and into diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CodeAddr(pub usize);

impl std::fmt::Display for CodeAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "code+{:#06x}", self.0)
    }
}

/// Compiler-resolved classification of one variable reference in a function
/// body. Produced once per literal and shared read-only by every closure
/// instantiated from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolRef {
    /// Slot index within the current frame.
    Local(usize),
    /// Index into the running closure's context.
    Upvalue(usize),
    /// Name lookup in the instance's environment table.
    Global(Symbol),
    /// The environment table itself.
    DefaultEnv,
}

impl std::fmt::Display for SymbolRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SymbolRef::Local(i) => write!(f, "local({i})"),
            SymbolRef::Upvalue(i) => write!(f, "upvalue({i})"),
            SymbolRef::Global(name) => write!(f, "global({name})"),
            SymbolRef::DefaultEnv => write!(f, "env"),
        }
    }
}

/// Where one captured free variable of a literal comes from, as recorded by
/// the compiler. Position `i` in a literal's capture list is position `i` in
/// every context built from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureRef {
    /// A local slot of the frame evaluating the literal.
    ParentLocal(usize),
    /// An upvalue already held by the closure running in that frame.
    ParentUpvalue(usize),
}

impl std::fmt::Display for CaptureRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureRef::ParentLocal(i) => write!(f, "parent-local({i})"),
            CaptureRef::ParentUpvalue(i) => write!(f, "parent-upvalue({i})"),
        }
    }
}

/// Compiled-function metadata, owned by the program, never by an individual
/// closure.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FuncProto {
    pub nparams: usize,
    /// Frame size in slots, parameters included.
    pub nslots: usize,
    pub entry: CodeAddr,
    /// Every variable reference of the body, in compiler order.
    pub symbols: Vec<SymbolRef>,
    /// Free variables of the body, in compiler order. Context index `i`
    /// always corresponds to `captures[i]`.
    pub captures: Vec<CaptureRef>,
}

impl FuncProto {
    pub fn new(nparams: usize, nslots: usize, entry: CodeAddr) -> Self {
        Self {
            nparams,
            nslots,
            entry,
            symbols: vec![],
            captures: vec![],
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Program {
    pub fn_table: Vec<(Symbol, FuncProto)>,
}

impl Program {
    pub fn get_fun_index(&self, name: &Symbol) -> Option<usize> {
        self.fn_table.iter().position(|(label, _f)| label == name)
    }
    pub fn get_proto(&self, index: usize) -> Option<&FuncProto> {
        self.fn_table.get(index).map(|(_, f)| f)
    }
}

impl std::fmt::Display for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (name, func) in self.fn_table.iter() {
            writeln!(f, "{name}")?;
            writeln!(
                f,
                "nparams:{} nslots:{} entry:{}",
                func.nparams, func.nslots, func.entry
            )?;
            writeln!(f, "captures: [{}]", func.captures.iter().format(", "))?;
            writeln!(f, "symbols:  [{}]", func.symbols.iter().format(", "))?;
        }
        Ok(())
    }
}
