//! Heap cell layout and value queries.
//!
//! Every heap object lives in one [`MemoryCell`]: a one-byte `flags` header
//! followed by a payload union of all variants. The header's low five bits
//! hold the type tag, bit five is the GC mark, bit six distinguishes short
//! from long strings. A zeroed cell reads as dead with a null free-list
//! link, which is exactly what sweep produces.
//!
//! Cells reference each other through raw pointers and tagged [`Value`]
//! words. The runtime maintains the invariant that every pointer value
//! reaching these functions addresses a live cell of the owning heap;
//! the accessors below lean on it.

use onyx_core::bytecode::InstructionBlock;
use onyx_core::{Value, ValueType};
use rustc_hash::FxHashMap;
use std::mem::ManuallyDrop;
use std::ptr::addr_of_mut;
use std::sync::Arc;

/// Header bit masks.
pub const FLAG_TYPE: u8 = 0b0001_1111;
pub const FLAG_MARK: u8 = 0b0010_0000;
pub const FLAG_SHORT_STRING: u8 = 0b0100_0000;

/// Longest string stored inline in a cell.
pub const SHORT_STRING_MAX: usize = 62;

/// Handle into the machine's internal-method registry. CFunction cells
/// carry this instead of a raw function pointer; the registry resolves it
/// at call time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodId(pub u32);

/// A position in an instruction block: function bodies, return addresses
/// and catch-table resume points.
#[derive(Clone)]
pub struct CodeAddress {
    pub block: Arc<InstructionBlock>,
    pub offset: usize,
}

impl CodeAddress {
    pub fn new(block: Arc<InstructionBlock>, offset: usize) -> CodeAddress {
        CodeAddress { block, offset }
    }
}

/// Destructor invoked exactly once when a CPointer cell is swept.
pub type CPointerDestructor = unsafe fn(*mut u8);

// =============================================================================
// Heap object variants
// =============================================================================

/// Free-list link. Lives in the payload of dead cells.
#[derive(Clone, Copy)]
pub struct FreeCell {
    pub next: *mut MemoryCell,
}

/// Instance of a class: class pointer plus symbol-keyed members.
pub struct ObjectCell {
    pub klass: Value,
    pub container: FxHashMap<Value, Value>,
}

/// Ordered sequence of values.
pub struct ArrayCell {
    pub data: Vec<Value>,
}

/// Inline storage for strings of up to [`SHORT_STRING_MAX`] bytes.
#[derive(Clone, Copy)]
pub struct ShortString {
    pub length: u8,
    pub data: [u8; SHORT_STRING_MAX],
}

/// Owned buffer for longer strings.
pub struct LongString {
    pub data: Box<[u8]>,
}

/// Either representation; the header's short-string bit picks the field.
pub union StringRepr {
    pub short: ShortString,
    pub long: ManuallyDrop<LongString>,
}

/// Boxed float, used when the value does not fit the immediate encoding.
#[derive(Clone, Copy)]
pub struct FloatCell {
    pub value: f64,
}

/// Script function.
pub struct FunctionCell {
    /// Name symbol.
    pub name: Value,
    pub argc: u32,
    pub lvarcount: u32,
    /// Frame captured at definition time; the lexical parent of every
    /// activation of this function. Null for top-level module functions.
    pub context: *mut MemoryCell,
    pub body: CodeAddress,
    pub anonymous: bool,
    pub bound_self: Option<Value>,
    /// Auxiliary attributes assigned from script code.
    pub container: FxHashMap<Value, Value>,
}

/// Native function: a registry handle plus call metadata.
pub struct CFunctionCell {
    pub name: Value,
    pub argc: u32,
    pub method: MethodId,
    pub bound_self: Option<Value>,
    pub container: FxHashMap<Value, Value>,
}

/// Script class.
pub struct ClassCell {
    pub name: Value,
    /// Function or null.
    pub constructor: Value,
    /// Member property symbols, in declaration order.
    pub member_properties: Vec<Value>,
    /// Object holding the method table, or null.
    pub prototype: Value,
    /// Class or null.
    pub parent_class: Value,
    /// Static members.
    pub container: FxHashMap<Value, Value>,
}

/// Activation record. Frames are ordinary heap cells so that closures and
/// generators can keep them alive past their dynamic extent.
pub struct FrameCell {
    /// Dynamic caller.
    pub parent: *mut MemoryCell,
    /// Lexical scope at function-definition time. May differ from `parent`.
    pub parent_environment_frame: *mut MemoryCell,
    /// Catch table that was active when this frame was pushed; restored on
    /// return.
    pub last_active_catchtable: *mut MemoryCell,
    /// The Function or Generator cell being executed, as a value. Null for
    /// synthetic frames.
    pub function: Value,
    pub locals: Vec<Value>,
    pub self_value: Value,
    /// Where the caller resumes. None for frames that end execution.
    pub return_address: Option<CodeAddress>,
    pub halt_after_return: bool,
}

/// Unwind target registered by `registercatchtable`.
pub struct CatchTableCell {
    pub address: CodeAddress,
    /// Operand stack height at registration, restored on unwind.
    pub stacksize: usize,
    pub frame: *mut MemoryCell,
    pub parent: *mut MemoryCell,
}

/// Opaque native resource under GC lifetime.
#[derive(Clone, Copy)]
pub struct CPointerCell {
    pub data: *mut u8,
    pub destructor: Option<CPointerDestructor>,
}

/// Function variant that retains its activation between invocations.
pub struct GeneratorCell {
    pub name: Value,
    pub argc: u32,
    pub lvarcount: u32,
    pub context: *mut MemoryCell,
    pub body: CodeAddress,
    /// Where the next invocation resumes; the body start before first call.
    pub resume_address: Option<CodeAddress>,
    /// Retained activation, null until the first invocation.
    pub frame: *mut MemoryCell,
    /// Operand-stack height at (re)entry. Values above it belong to the
    /// generator and are parked in `saved_stack` across suspensions.
    pub stack_base: usize,
    pub saved_stack: Vec<Value>,
    pub bound_self: Option<Value>,
    pub finished: bool,
    pub container: FxHashMap<Value, Value>,
}

/// Payload union. Fields with drop glue are wrapped in `ManuallyDrop`;
/// [`MemoryCell::clean`] drops the active one at sweep time.
pub union CellData {
    pub free: FreeCell,
    pub float: FloatCell,
    pub cpointer: CPointerCell,
    pub string: ManuallyDrop<StringRepr>,
    pub object: ManuallyDrop<ObjectCell>,
    pub array: ManuallyDrop<ArrayCell>,
    pub function: ManuallyDrop<FunctionCell>,
    pub cfunction: ManuallyDrop<CFunctionCell>,
    pub class: ManuallyDrop<ClassCell>,
    pub frame: ManuallyDrop<FrameCell>,
    pub catchtable: ManuallyDrop<CatchTableCell>,
    pub generator: ManuallyDrop<GeneratorCell>,
}

/// One uniform heap slot.
#[repr(C)]
pub struct MemoryCell {
    pub(crate) flags: u8,
    pub(crate) data: CellData,
}

impl MemoryCell {
    /// A dead cell with a null free link.
    pub fn new_dead() -> MemoryCell {
        MemoryCell {
            flags: 0,
            data: CellData {
                free: FreeCell {
                    next: std::ptr::null_mut(),
                },
            },
        }
    }

    // =========================================================================
    // Header
    // =========================================================================

    #[inline]
    pub fn cell_type(&self) -> ValueType {
        ValueType::from_tag(self.flags & FLAG_TYPE)
    }

    #[inline]
    pub(crate) fn set_type(&mut self, cell_type: ValueType) {
        self.flags = (self.flags & !FLAG_TYPE) | (cell_type as u8 & FLAG_TYPE);
    }

    #[inline]
    pub fn is_marked(&self) -> bool {
        self.flags & FLAG_MARK != 0
    }

    #[inline]
    pub(crate) fn set_mark(&mut self, marked: bool) {
        if marked {
            self.flags |= FLAG_MARK;
        } else {
            self.flags &= !FLAG_MARK;
        }
    }

    #[inline]
    pub fn is_short_string(&self) -> bool {
        self.flags & FLAG_SHORT_STRING != 0
    }

    /// The tagged value addressing this cell.
    #[inline]
    pub fn as_value(&self) -> Value {
        Value::from_ptr(self as *const MemoryCell)
    }

    // =========================================================================
    // Initializers
    //
    // Each takes a dead cell and installs one variant. The header is set
    // first so a collection triggered mid-construction sees a consistent
    // type for the (still childless) cell.
    // =========================================================================

    pub fn init_object(&mut self, klass: Value) {
        debug_assert_eq!(self.cell_type(), ValueType::Dead);
        self.set_type(ValueType::Object);
        self.data.object = ManuallyDrop::new(ObjectCell {
            klass,
            container: FxHashMap::default(),
        });
    }

    pub fn init_array(&mut self, capacity: usize) {
        debug_assert_eq!(self.cell_type(), ValueType::Dead);
        self.set_type(ValueType::Array);
        self.data.array = ManuallyDrop::new(ArrayCell {
            data: Vec::with_capacity(capacity),
        });
    }

    pub fn init_string(&mut self, bytes: &[u8]) {
        debug_assert_eq!(self.cell_type(), ValueType::Dead);
        self.set_type(ValueType::String);
        if bytes.len() <= SHORT_STRING_MAX {
            let mut data = [0u8; SHORT_STRING_MAX];
            data[..bytes.len()].copy_from_slice(bytes);
            self.flags |= FLAG_SHORT_STRING;
            self.data.string = ManuallyDrop::new(StringRepr {
                short: ShortString {
                    length: bytes.len() as u8,
                    data,
                },
            });
        } else {
            self.data.string = ManuallyDrop::new(StringRepr {
                long: ManuallyDrop::new(LongString { data: bytes.into() }),
            });
        }
    }

    pub fn init_float(&mut self, value: f64) {
        debug_assert_eq!(self.cell_type(), ValueType::Dead);
        self.set_type(ValueType::Float);
        self.data.float = FloatCell { value };
    }

    pub fn init_function(&mut self, function: FunctionCell) {
        debug_assert_eq!(self.cell_type(), ValueType::Dead);
        self.set_type(ValueType::Function);
        self.data.function = ManuallyDrop::new(function);
    }

    pub fn init_cfunction(&mut self, cfunction: CFunctionCell) {
        debug_assert_eq!(self.cell_type(), ValueType::Dead);
        self.set_type(ValueType::CFunction);
        self.data.cfunction = ManuallyDrop::new(cfunction);
    }

    pub fn init_class(&mut self, class: ClassCell) {
        debug_assert_eq!(self.cell_type(), ValueType::Dead);
        self.set_type(ValueType::Class);
        self.data.class = ManuallyDrop::new(class);
    }

    pub fn init_frame(&mut self, frame: FrameCell) {
        debug_assert_eq!(self.cell_type(), ValueType::Dead);
        self.set_type(ValueType::Frame);
        self.data.frame = ManuallyDrop::new(frame);
    }

    pub fn init_catchtable(&mut self, table: CatchTableCell) {
        debug_assert_eq!(self.cell_type(), ValueType::Dead);
        self.set_type(ValueType::CatchTable);
        self.data.catchtable = ManuallyDrop::new(table);
    }

    pub fn init_cpointer(&mut self, data: *mut u8, destructor: Option<CPointerDestructor>) {
        debug_assert_eq!(self.cell_type(), ValueType::Dead);
        self.set_type(ValueType::CPointer);
        self.data.cpointer = CPointerCell { data, destructor };
    }

    pub fn init_generator(&mut self, generator: GeneratorCell) {
        debug_assert_eq!(self.cell_type(), ValueType::Dead);
        self.set_type(ValueType::Generator);
        self.data.generator = ManuallyDrop::new(generator);
    }

    // =========================================================================
    // Typed accessors
    //
    // Safety: the caller must have checked `cell_type` against the accessed
    // variant; reading the wrong union field is undefined behavior.
    // =========================================================================

    pub unsafe fn object(&self) -> &ObjectCell {
        debug_assert_eq!(self.cell_type(), ValueType::Object);
        unsafe { &self.data.object }
    }

    pub unsafe fn object_mut(&mut self) -> &mut ObjectCell {
        debug_assert_eq!(self.cell_type(), ValueType::Object);
        unsafe { &mut self.data.object }
    }

    pub unsafe fn array(&self) -> &ArrayCell {
        debug_assert_eq!(self.cell_type(), ValueType::Array);
        unsafe { &self.data.array }
    }

    pub unsafe fn array_mut(&mut self) -> &mut ArrayCell {
        debug_assert_eq!(self.cell_type(), ValueType::Array);
        unsafe { &mut self.data.array }
    }

    pub unsafe fn float(&self) -> f64 {
        debug_assert_eq!(self.cell_type(), ValueType::Float);
        unsafe { self.data.float.value }
    }

    pub unsafe fn function(&self) -> &FunctionCell {
        debug_assert_eq!(self.cell_type(), ValueType::Function);
        unsafe { &self.data.function }
    }

    pub unsafe fn function_mut(&mut self) -> &mut FunctionCell {
        debug_assert_eq!(self.cell_type(), ValueType::Function);
        unsafe { &mut self.data.function }
    }

    pub unsafe fn cfunction(&self) -> &CFunctionCell {
        debug_assert_eq!(self.cell_type(), ValueType::CFunction);
        unsafe { &self.data.cfunction }
    }

    pub unsafe fn cfunction_mut(&mut self) -> &mut CFunctionCell {
        debug_assert_eq!(self.cell_type(), ValueType::CFunction);
        unsafe { &mut self.data.cfunction }
    }

    pub unsafe fn class(&self) -> &ClassCell {
        debug_assert_eq!(self.cell_type(), ValueType::Class);
        unsafe { &self.data.class }
    }

    pub unsafe fn class_mut(&mut self) -> &mut ClassCell {
        debug_assert_eq!(self.cell_type(), ValueType::Class);
        unsafe { &mut self.data.class }
    }

    pub unsafe fn frame(&self) -> &FrameCell {
        debug_assert_eq!(self.cell_type(), ValueType::Frame);
        unsafe { &self.data.frame }
    }

    pub unsafe fn frame_mut(&mut self) -> &mut FrameCell {
        debug_assert_eq!(self.cell_type(), ValueType::Frame);
        unsafe { &mut self.data.frame }
    }

    pub unsafe fn catchtable(&self) -> &CatchTableCell {
        debug_assert_eq!(self.cell_type(), ValueType::CatchTable);
        unsafe { &self.data.catchtable }
    }

    pub unsafe fn cpointer(&self) -> CPointerCell {
        debug_assert_eq!(self.cell_type(), ValueType::CPointer);
        unsafe { self.data.cpointer }
    }

    pub unsafe fn generator(&self) -> &GeneratorCell {
        debug_assert_eq!(self.cell_type(), ValueType::Generator);
        unsafe { &self.data.generator }
    }

    pub unsafe fn generator_mut(&mut self) -> &mut GeneratorCell {
        debug_assert_eq!(self.cell_type(), ValueType::Generator);
        unsafe { &mut self.data.generator }
    }

    /// String content.
    ///
    /// # Safety
    ///
    /// The cell must be a String.
    pub unsafe fn string_bytes(&self) -> &[u8] {
        debug_assert_eq!(self.cell_type(), ValueType::String);
        unsafe {
            if self.is_short_string() {
                let short = &self.data.string.short;
                &short.data[..short.length as usize]
            } else {
                &self.data.string.long.data
            }
        }
    }

    /// String content as UTF-8. Strings are only ever created from `&str`,
    /// so the bytes are valid by construction.
    ///
    /// # Safety
    ///
    /// The cell must be a String.
    pub unsafe fn string_str(&self) -> &str {
        unsafe { std::str::from_utf8_unchecked(self.string_bytes()) }
    }

    /// Drop the owned parts of the active variant. Called by sweep before
    /// the cell is zeroed and refiled as free.
    ///
    /// # Safety
    ///
    /// Must be called at most once per live variant; afterwards the cell
    /// payload is garbage and must be zeroed before reuse.
    pub(crate) unsafe fn clean(&mut self) {
        unsafe {
            match self.cell_type() {
                ValueType::Object => ManuallyDrop::drop(&mut self.data.object),
                ValueType::Array => ManuallyDrop::drop(&mut self.data.array),
                ValueType::String => {
                    if !self.is_short_string() {
                        let string_ptr: *mut StringRepr =
                            addr_of_mut!(self.data.string) as *mut StringRepr;
                        let long_ptr = addr_of_mut!((*string_ptr).long);
                        ManuallyDrop::drop(&mut *long_ptr);
                    }
                }
                ValueType::Function => ManuallyDrop::drop(&mut self.data.function),
                ValueType::CFunction => ManuallyDrop::drop(&mut self.data.cfunction),
                ValueType::Class => ManuallyDrop::drop(&mut self.data.class),
                ValueType::Frame => ManuallyDrop::drop(&mut self.data.frame),
                ValueType::CatchTable => ManuallyDrop::drop(&mut self.data.catchtable),
                ValueType::Generator => ManuallyDrop::drop(&mut self.data.generator),
                ValueType::CPointer => {
                    let cpointer = self.data.cpointer;
                    if let Some(destructor) = cpointer.destructor {
                        destructor(cpointer.data);
                    }
                }
                _ => {}
            }
        }
    }
}

// =============================================================================
// Value queries
//
// These resolve queries that need the cell header or payload, completing
// the immediate-only half implemented on `Value` itself.
// =============================================================================

/// Full type of a value, heap cells included.
pub fn type_of(value: Value) -> ValueType {
    match value.immediate_type() {
        Some(immediate) => immediate,
        None => match value.as_ptr::<MemoryCell>() {
            Some(cell) => unsafe { (*cell).cell_type() },
            None => ValueType::Dead,
        },
    }
}

/// True for immediate integers, immediate floats and boxed floats.
pub fn is_numeric(value: Value) -> bool {
    matches!(type_of(value), ValueType::Integer | ValueType::Float)
}

/// Numeric interpretation widened to a double, regardless of encoding.
pub fn numeric_value(value: Value) -> Option<f64> {
    if let Some(n) = value.immediate_numeric() {
        return Some(n);
    }
    let cell = value.as_ptr::<MemoryCell>()?;
    unsafe {
        if (*cell).cell_type() == ValueType::Float {
            Some((*cell).float())
        } else {
            None
        }
    }
}

/// `false`, `null` and numeric zero are falsy; everything else is truthy.
pub fn truthyness(value: Value) -> bool {
    if let Some(n) = numeric_value(value) {
        return n != 0.0;
    }
    !(value.is_false() || value.is_null())
}

/// Equality: numerics cross-compare after widening, strings compare by
/// content, everything else by identity (word equality).
pub fn values_equal(left: Value, right: Value) -> bool {
    if let (Some(a), Some(b)) = (numeric_value(left), numeric_value(right)) {
        return a == b;
    }
    if type_of(left) == ValueType::String && type_of(right) == ValueType::String {
        if let (Some(lcell), Some(rcell)) =
            (left.as_ptr::<MemoryCell>(), right.as_ptr::<MemoryCell>())
        {
            return unsafe { (*lcell).string_bytes() == (*rcell).string_bytes() };
        }
    }
    left.raw() == right.raw()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dead_cell_is_zeroed() {
        let cell = MemoryCell::new_dead();
        assert_eq!(cell.cell_type(), ValueType::Dead);
        assert!(!cell.is_marked());
        assert!(!cell.is_short_string());
    }

    #[test]
    fn test_header_bit_independence() {
        let mut cell = MemoryCell::new_dead();
        cell.set_type(ValueType::Array);
        cell.set_mark(true);
        assert_eq!(cell.cell_type(), ValueType::Array);
        assert!(cell.is_marked());
        cell.set_mark(false);
        assert_eq!(cell.cell_type(), ValueType::Array);
        assert!(!cell.is_marked());
    }

    #[test]
    fn test_short_and_long_strings() {
        let mut short = MemoryCell::new_dead();
        short.init_string(b"hi");
        assert!(short.is_short_string());
        assert_eq!(unsafe { short.string_bytes() }, b"hi");

        let text = "x".repeat(SHORT_STRING_MAX + 1);
        let mut long = MemoryCell::new_dead();
        long.init_string(text.as_bytes());
        assert!(!long.is_short_string());
        assert_eq!(unsafe { long.string_str() }, text);
        unsafe { long.clean() };
    }

    #[test]
    fn test_boundary_string_is_short() {
        let text = "y".repeat(SHORT_STRING_MAX);
        let mut cell = MemoryCell::new_dead();
        cell.init_string(text.as_bytes());
        assert!(cell.is_short_string());
        assert_eq!(unsafe { cell.string_bytes() }.len(), SHORT_STRING_MAX);
    }

    #[test]
    fn test_float_cell_round_trip() {
        let mut cell = MemoryCell::new_dead();
        cell.init_float(-0.0);
        assert_eq!(cell.cell_type(), ValueType::Float);
        let value = unsafe { cell.float() };
        assert_eq!(value, 0.0);
        assert!(value.is_sign_negative());
    }

    #[test]
    fn test_boxed_and_immediate_floats_agree() {
        // A value that fits the immediate encoding reads identically when
        // forced into a boxed cell.
        let immediate = Value::float_immediate(2.5).unwrap();
        let mut boxed = MemoryCell::new_dead();
        boxed.init_float(2.5);
        assert_eq!(
            numeric_value(immediate),
            numeric_value(boxed.as_value())
        );
        assert!(is_numeric(boxed.as_value()));
    }

    #[test]
    fn test_truthyness_table() {
        assert!(!truthyness(Value::FALSE));
        assert!(!truthyness(Value::NULL));
        assert!(!truthyness(Value::integer(0).unwrap()));
        assert!(!truthyness(Value::float_immediate(0.0).unwrap()));
        assert!(truthyness(Value::TRUE));
        assert!(truthyness(Value::integer(1).unwrap()));
        assert!(truthyness(Value::integer(-1).unwrap()));
        assert!(truthyness(Value::symbol(0)));
    }

    #[test]
    fn test_numeric_cross_equality() {
        let int = Value::integer(3).unwrap();
        let float = Value::float_immediate(3.0).unwrap();
        assert!(values_equal(int, float));
        assert!(!values_equal(int, Value::float_immediate(3.5).unwrap()));
        assert!(!values_equal(Value::TRUE, Value::integer(1).unwrap()));
        assert!(values_equal(Value::NULL, Value::NULL));
    }

    #[test]
    fn test_string_content_equality() {
        let mut a = MemoryCell::new_dead();
        let mut b = MemoryCell::new_dead();
        a.init_string(b"same");
        b.init_string(b"same");
        assert!(values_equal(a.as_value(), b.as_value()));

        let mut c = MemoryCell::new_dead();
        c.init_string(b"other");
        assert!(!values_equal(a.as_value(), c.as_value()));
    }
}
