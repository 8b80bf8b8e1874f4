use std::cell::RefCell;
use std::rc::Rc;

use crate::runtime::value::Value;
use crate::runtime::{Error, InternalError};

use super::program::{CaptureRef, FuncProto};

// Cells are Rc<RefCell<..>> because one cell may be shared between the
// declaring frame and any number of closures, across any nesting depth.

/// The shared mutable box implementing one upvalue's storage. Writes through
/// any holder are immediately visible to every other holder; cells never
/// merge and never split once created.
#[derive(Debug, Clone, Default)]
pub struct UpvalueCell(Rc<RefCell<Value>>);

impl UpvalueCell {
    pub fn new(value: Value) -> Self {
        Self(Rc::new(RefCell::new(value)))
    }
    pub fn get(&self) -> Value {
        self.0.borrow().clone()
    }
    pub fn set(&self, value: Value) {
        *self.0.borrow_mut() = value;
    }
    /// True when both handles are the same storage, i.e. the same upvalue.
    pub fn shares_with(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

// A cell is the same upvalue only if it is the same storage; value equality
// between distinct cells is meaningless here.
impl PartialEq for UpvalueCell {
    fn eq(&self, other: &Self) -> bool {
        self.shares_with(other)
    }
}

thread_local!(static EMPTY_CONTEXT: ClosureContext = ClosureContext {
    cells: Rc::from(Vec::new()),
});

/// The ordered, fixed-shape cell sequence bound into one closure. Index `i`
/// permanently corresponds to the i-th capture descriptor of the literal the
/// closure was instantiated from. The shape is immutable; only cell contents
/// change.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosureContext {
    cells: Rc<[UpvalueCell]>,
}

impl ClosureContext {
    /// The context shared by every closure that captures nothing. Sharing is
    /// a performance fact, not a semantic one: with zero cells there is no
    /// observable state to leak between holders.
    pub fn empty() -> Self {
        EMPTY_CONTEXT.with(|ctx| ctx.clone())
    }

    pub(crate) fn from_cells(cells: Vec<UpvalueCell>) -> Self {
        if cells.is_empty() {
            Self::empty()
        } else {
            Self {
                cells: Rc::from(cells),
            }
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Read the i-th upvalue.
    ///
    /// Panics on an out-of-range index: the compiler guarantees every
    /// `Upvalue(i)` reference stays within the capture list, so reaching this
    /// with a bad index is an interpreter defect, not a script error.
    pub fn get(&self, index: usize) -> Value {
        self.cell(index)
            .unwrap_or_else(|| panic!("upvalue index {index} out of range (context has {} cells)", self.len()))
            .get()
    }

    /// Write the i-th upvalue; the new value is immediately visible to every
    /// holder of the cell. Panics on an out-of-range index, see [`Self::get`].
    pub fn set(&self, index: usize, value: Value) {
        self.cell(index)
            .unwrap_or_else(|| panic!("upvalue index {index} out of range (context has {} cells)", self.len()))
            .set(value);
    }

    pub(crate) fn cell(&self, index: usize) -> Option<&UpvalueCell> {
        self.cells.get(index)
    }
}

/// Per-frame record of which local slots were already promoted to cells, so a
/// second capture of the same slot reuses the exact same cell. Consulted and
/// populated lazily on first capture.
#[derive(Debug, Default)]
struct SlotUpvalueMap(Vec<(usize, UpvalueCell)>);

impl SlotUpvalueMap {
    fn get(&self, slot: usize) -> Option<&UpvalueCell> {
        self.0
            .iter()
            .find_map(|(s, cell)| (*s == slot).then_some(cell))
    }
    fn get_or_insert(&mut self, slot: usize, seed: impl FnOnce() -> Value) -> UpvalueCell {
        self.get(slot).cloned().unwrap_or_else(|| {
            let cell = UpvalueCell::new(seed());
            log::trace!("promote local slot {slot} to upvalue cell");
            self.0.push((slot, cell.clone()));
            cell
        })
    }
}

/// One activation record: the frame-local slots plus the promotion map. Once
/// a slot has been promoted, reads and writes of that local go through its
/// cell for the remainder of the frame's life, so the frame and the closures
/// that captured it can never fall out of sync.
#[derive(Debug, Default)]
pub struct Frame {
    slots: Vec<Value>,
    promoted: SlotUpvalueMap,
}

impl Frame {
    pub fn new(nslots: usize) -> Self {
        Self {
            slots: vec![Value::Nil; nslots],
            promoted: SlotUpvalueMap::default(),
        }
    }

    /// Frame for a call: arguments in the leading slots, missing ones nil,
    /// extra ones dropped.
    pub fn for_call(proto: &FuncProto, args: &[Value]) -> Self {
        let mut frame = Self::new(proto.nslots.max(proto.nparams));
        let nargs = args.len().min(proto.nparams);
        frame.slots[..nargs].clone_from_slice(&args[..nargs]);
        frame
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Read a local. Indices are compiler-guaranteed; out of range panics as
    /// an invariant violation.
    pub fn get(&self, slot: usize) -> Value {
        match self.promoted.get(slot) {
            Some(cell) => cell.get(),
            None => self.slots[slot].clone(),
        }
    }

    /// Write a local, through its cell if the slot was promoted.
    pub fn set(&mut self, slot: usize, value: Value) {
        match self.promoted.get(slot) {
            Some(cell) => cell.set(value),
            None => self.slots[slot] = value,
        }
    }

    /// First capture of a slot moves its current value into a fresh cell and
    /// records the promotion; later captures reuse that cell.
    fn promote(&mut self, slot: usize) -> Option<UpvalueCell> {
        if slot >= self.slots.len() {
            return None;
        }
        let seed = &self.slots[slot];
        Some(self.promoted.get_or_insert(slot, || seed.clone()))
    }

    /// Whether a slot currently has a promoted cell.
    pub fn is_promoted(&self, slot: usize) -> bool {
        self.promoted.get(slot).is_some()
    }
}

/// The capture algorithm, run once per function-literal evaluation. Builds
/// the new closure's context from the literal's capture descriptors: parent
/// locals are promoted (or their existing cell reused), parent upvalues chain
/// the cell handle straight out of the enclosing context. Order is exactly
/// compiler order; nothing is deduplicated beyond slot-promotion reuse.
pub(crate) fn resolve_captures(
    proto: &FuncProto,
    frame: &mut Frame,
    enclosing: &ClosureContext,
) -> Result<ClosureContext, Error> {
    let mut cells = Vec::with_capacity(proto.captures.len());
    for capture in proto.captures.iter() {
        let cell = match *capture {
            CaptureRef::ParentLocal(slot) => frame.promote(slot).ok_or_else(|| {
                Error::internal(
                    InternalError::CaptureSlotOutOfRange {
                        slot,
                        frame_len: frame.len(),
                    },
                    proto.entry,
                )
            })?,
            CaptureRef::ParentUpvalue(index) => {
                enclosing.cell(index).cloned().ok_or_else(|| {
                    Error::internal(
                        InternalError::CaptureUpvalueOutOfRange {
                            index,
                            context_len: enclosing.len(),
                        },
                        proto.entry,
                    )
                })?
            }
        };
        cells.push(cell);
    }
    log::trace!(
        "resolved {} capture(s) for literal at {}",
        cells.len(),
        proto.entry
    );
    Ok(ClosureContext::from_cells(cells))
}
