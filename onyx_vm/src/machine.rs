//! The virtual machine.
//!
//! [`VirtualMachine`] owns the heap, the operand stack, the frame and catch
//! chains, the scheduler state and the worker pool. A single
//! fetch-decode-execute loop drives execution; every allocation flows
//! through [`allocate_cell`], which presents the machine's complete root
//! set to the heap so a collection can strike between any two
//! instructions.
//!
//! [`allocate_cell`]: VirtualMachine::allocate_cell

use crate::context::{InStream, OutStream, RuntimeFlags, VmContext};
use crate::internals::InternalsRegistry;
use crate::profile::InstructionProfile;
use crate::scheduler::{IntervalEntry, Task};
use crate::worker::WorkerPool;
use onyx_core::bytecode::{InstructionBlock, Opcode};
use onyx_core::{CoreError, CoreResult, SymbolTable, Value, ValueType};
use onyx_gc::{
    type_of, CodeAddress, FunctionCell, GeneratorCell, Heap, HeapConfig, MemoryCell, MethodId,
    RootSet, TempScope,
};
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, VecDeque};
use std::ptr::NonNull;
use std::sync::Arc;
use std::time::Instant;

/// Per-type class references installed by the prelude, consulted when
/// member lookup misses on a primitive receiver.
#[derive(Clone, Copy)]
pub(crate) struct Primitives {
    pub value: Value,
    pub object: Value,
    pub class: Value,
    pub array: Value,
    pub string: Value,
    pub number: Value,
    pub function: Value,
    pub generator: Value,
    pub boolean: Value,
    pub null: Value,
}

impl Primitives {
    fn new() -> Primitives {
        Primitives {
            value: Value::NULL,
            object: Value::NULL,
            class: Value::NULL,
            array: Value::NULL,
            string: Value::NULL,
            number: Value::NULL,
            function: Value::NULL,
            generator: Value::NULL,
            boolean: Value::NULL,
            null: Value::NULL,
        }
    }

    pub(crate) fn as_array(&self) -> [Value; 10] {
        [
            self.value,
            self.object,
            self.class,
            self.array,
            self.string,
            self.number,
            self.function,
            self.generator,
            self.boolean,
            self.null,
        ]
    }
}

/// Root view handed to the heap on every allocation and collection. Covers
/// every place the machine parks values outside the heap itself.
pub(crate) struct VmRoots<'a> {
    pub stack: &'a [Value],
    pub frames: *mut MemoryCell,
    pub catchstack: *mut MemoryCell,
    pub top_frame: *mut MemoryCell,
    pub last_exception: Value,
    pub primitives: [Value; 10],
    pub tasks: &'a VecDeque<Task>,
    pub timers: &'a BTreeMap<(Instant, u64), Task>,
    pub intervals: &'a BTreeMap<(Instant, u64), IntervalEntry>,
    pub pending_callbacks: &'a FxHashMap<u64, Value>,
}

impl RootSet for VmRoots<'_> {
    fn trace(&self, visit: &mut dyn FnMut(Value)) {
        for &value in self.stack {
            visit(value);
        }
        for cell in [self.frames, self.catchstack, self.top_frame] {
            if !cell.is_null() {
                visit(Value::from_ptr(cell));
            }
        }
        visit(self.last_exception);
        for value in self.primitives {
            visit(value);
        }
        for task in self.tasks {
            visit(task.function);
            visit(task.argument);
        }
        for task in self.timers.values() {
            visit(task.function);
            visit(task.argument);
        }
        for entry in self.intervals.values() {
            visit(entry.task.function);
            visit(entry.task.argument);
        }
        for &callback in self.pending_callbacks.values() {
            visit(callback);
        }
    }
}

/// The Onyx virtual machine.
pub struct VirtualMachine {
    pub(crate) heap: Heap,
    pub(crate) symbols: SymbolTable,
    pub(crate) internals: InternalsRegistry,

    // Execution state.
    pub(crate) stack: Vec<Value>,
    pub(crate) frames: *mut MemoryCell,
    pub(crate) catchstack: *mut MemoryCell,
    pub(crate) ip: Option<CodeAddress>,
    pub(crate) halted: bool,
    pub(crate) running: bool,
    pub(crate) status_code: u8,
    pub(crate) top_frame: *mut MemoryCell,
    pub(crate) last_exception: Value,
    pub(crate) uncaught_exception: Option<String>,
    /// Set by `throw_value`; `call_cfunction` reads it to know whether the
    /// native's return value still has a stack to land on.
    pub(crate) native_unwound: bool,
    pub(crate) primitives: Primitives,

    // Scheduler state.
    pub(crate) task_queue: VecDeque<Task>,
    pub(crate) timers: BTreeMap<(Instant, u64), Task>,
    pub(crate) intervals: BTreeMap<(Instant, u64), IntervalEntry>,
    pub(crate) next_timer_id: u64,

    // Worker pool.
    pub(crate) workers: WorkerPool,
    pub(crate) pending_callbacks: FxHashMap<u64, Value>,

    // Configuration.
    pub(crate) flags: RuntimeFlags,
    pub(crate) in_stream: InStream,
    pub(crate) out_stream: OutStream,
    pub(crate) err_stream: OutStream,
    pub(crate) profile: Option<InstructionProfile>,
    pub(crate) start_time: Instant,
}

impl VirtualMachine {
    /// Construct the machine and run the prelude, which installs the
    /// primitive classes through the internals registry.
    pub fn new(ctx: VmContext) -> CoreResult<VirtualMachine> {
        let heap = Heap::new(HeapConfig {
            trace: ctx.flags.trace_gc,
            sink: Some(ctx.err_stream.clone()),
            ..HeapConfig::default()
        });

        let mut vm = VirtualMachine {
            heap,
            symbols: SymbolTable::new(),
            internals: InternalsRegistry::new(),
            stack: Vec::with_capacity(256),
            frames: std::ptr::null_mut(),
            catchstack: std::ptr::null_mut(),
            ip: None,
            halted: false,
            running: true,
            status_code: 0,
            top_frame: std::ptr::null_mut(),
            last_exception: Value::NULL,
            uncaught_exception: None,
            native_unwound: false,
            primitives: Primitives::new(),
            task_queue: VecDeque::new(),
            timers: BTreeMap::new(),
            intervals: BTreeMap::new(),
            next_timer_id: 0,
            workers: WorkerPool::new(ctx.flags.single_worker_thread),
            pending_callbacks: FxHashMap::default(),
            flags: ctx.flags,
            in_stream: ctx.in_stream,
            out_stream: ctx.out_stream,
            err_stream: ctx.err_stream,
            profile: ctx.flags.instruction_profile.then(InstructionProfile::new),
            start_time: Instant::now(),
        };

        // The upper-most environment frame. Modules hang their environment
        // off it, so separately loaded modules cannot reach each other's
        // locals.
        let top = vm.create_frame(Value::NULL, Value::NULL, 0, std::ptr::null_mut(), None, true)?;
        vm.top_frame = top;

        vm.exec_prelude()?;
        Ok(vm)
    }

    // =========================================================================
    // Allocation and rooting
    // =========================================================================

    /// Pop a cell from the heap with the full machine root set in scope.
    pub(crate) fn allocate_cell(&mut self) -> CoreResult<NonNull<MemoryCell>> {
        let Self {
            heap,
            stack,
            frames,
            catchstack,
            top_frame,
            last_exception,
            primitives,
            task_queue,
            timers,
            intervals,
            pending_callbacks,
            ..
        } = self;
        let roots = VmRoots {
            stack: stack.as_slice(),
            frames: *frames,
            catchstack: *catchstack,
            top_frame: *top_frame,
            last_exception: *last_exception,
            primitives: primitives.as_array(),
            tasks: task_queue,
            timers,
            intervals,
            pending_callbacks,
        };
        heap.allocate(&roots)
    }

    /// Force a full collection. The embedder may call this between tasks.
    pub fn collect_garbage(&mut self) {
        let Self {
            heap,
            stack,
            frames,
            catchstack,
            top_frame,
            last_exception,
            primitives,
            task_queue,
            timers,
            intervals,
            pending_callbacks,
            ..
        } = self;
        let roots = VmRoots {
            stack: stack.as_slice(),
            frames: *frames,
            catchstack: *catchstack,
            top_frame: *top_frame,
            last_exception: *last_exception,
            primitives: primitives.as_array(),
            tasks: task_queue,
            timers,
            intervals,
            pending_callbacks,
        };
        heap.collect(&roots);
    }

    // =========================================================================
    // Value constructors
    //
    // Values passed in as children (class pointers, bound selves) must be
    // reachable from a root or pinned in a TempScope: each constructor
    // allocates exactly one cell and may trigger a collection doing so.
    // =========================================================================

    pub fn create_object(&mut self, klass: Value) -> CoreResult<Value> {
        let cell = self.allocate_cell()?;
        unsafe {
            (*cell.as_ptr()).init_object(klass);
            Ok((*cell.as_ptr()).as_value())
        }
    }

    pub fn create_array(&mut self, capacity: usize) -> CoreResult<Value> {
        let cell = self.allocate_cell()?;
        unsafe {
            (*cell.as_ptr()).init_array(capacity);
            Ok((*cell.as_ptr()).as_value())
        }
    }

    pub fn create_string(&mut self, text: &str) -> CoreResult<Value> {
        let cell = self.allocate_cell()?;
        unsafe {
            (*cell.as_ptr()).init_string(text.as_bytes());
            Ok((*cell.as_ptr()).as_value())
        }
    }

    /// Immediate encoding when the bit pattern allows it, a boxed cell
    /// otherwise.
    pub fn create_float(&mut self, value: f64) -> CoreResult<Value> {
        if let Some(immediate) = Value::float_immediate(value) {
            return Ok(immediate);
        }
        let cell = self.allocate_cell()?;
        unsafe {
            (*cell.as_ptr()).init_float(value);
            Ok((*cell.as_ptr()).as_value())
        }
    }

    /// Immediate integer, widening to a float when out of range.
    pub(crate) fn make_integer(&mut self, value: i64) -> CoreResult<Value> {
        match Value::integer(value) {
            Some(v) => Ok(v),
            None => self.create_float(value as f64),
        }
    }

    pub fn create_function(
        &mut self,
        name: Value,
        body: CodeAddress,
        argc: u32,
        lvarcount: u32,
        anonymous: bool,
    ) -> CoreResult<Value> {
        let context = self.frames;
        let cell = self.allocate_cell()?;
        unsafe {
            (*cell.as_ptr()).init_function(FunctionCell {
                name,
                argc,
                lvarcount,
                context,
                body,
                anonymous,
                bound_self: None,
                container: FxHashMap::default(),
            });
            Ok((*cell.as_ptr()).as_value())
        }
    }

    pub fn create_cfunction(&mut self, name: Value, method: MethodId, argc: u32) -> CoreResult<Value> {
        let cell = self.allocate_cell()?;
        unsafe {
            (*cell.as_ptr()).init_cfunction(onyx_gc::CFunctionCell {
                name,
                argc,
                method,
                bound_self: None,
                container: FxHashMap::default(),
            });
            Ok((*cell.as_ptr()).as_value())
        }
    }

    pub fn create_generator(
        &mut self,
        name: Value,
        body: CodeAddress,
        argc: u32,
        lvarcount: u32,
    ) -> CoreResult<Value> {
        let context = self.frames;
        let cell = self.allocate_cell()?;
        unsafe {
            (*cell.as_ptr()).init_generator(GeneratorCell {
                name,
                argc,
                lvarcount,
                context,
                body,
                resume_address: None,
                frame: std::ptr::null_mut(),
                stack_base: 0,
                saved_stack: Vec::new(),
                bound_self: None,
                finished: false,
                container: FxHashMap::default(),
            });
            Ok((*cell.as_ptr()).as_value())
        }
    }

    /// A bare class; the caller fills in prototype, constructor, member
    /// properties and parent afterwards.
    pub fn create_class(&mut self, name: Value) -> CoreResult<Value> {
        let cell = self.allocate_cell()?;
        unsafe {
            (*cell.as_ptr()).init_class(onyx_gc::ClassCell {
                name,
                constructor: Value::NULL,
                member_properties: Vec::new(),
                prototype: Value::NULL,
                parent_class: Value::NULL,
                container: FxHashMap::default(),
            });
            Ok((*cell.as_ptr()).as_value())
        }
    }

    pub fn create_cpointer(
        &mut self,
        data: *mut u8,
        destructor: Option<onyx_gc::CPointerDestructor>,
    ) -> CoreResult<Value> {
        let cell = self.allocate_cell()?;
        unsafe {
            (*cell.as_ptr()).init_cpointer(data, destructor);
            Ok((*cell.as_ptr()).as_value())
        }
    }

    // =========================================================================
    // Operand stack
    // =========================================================================

    #[inline]
    pub(crate) fn push_stack(&mut self, value: Value) {
        self.stack.push(value);
    }

    #[inline]
    pub(crate) fn pop_stack(&mut self, opcode: &'static str) -> CoreResult<Value> {
        self.stack.pop().ok_or(CoreError::StackUnderflow { opcode })
    }

    /// Read-only view of the operand stack.
    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    // =========================================================================
    // Small public surface
    // =========================================================================

    /// Intern a name in the machine's symbol table.
    pub fn intern(&mut self, name: &str) -> Value {
        self.symbols.intern(name)
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn heap_stats(&self) -> onyx_gc::GcStats {
        self.heap.stats()
    }

    pub fn free_cells(&self) -> usize {
        self.heap.free_cell_count()
    }

    /// Depth of the dynamic frame chain, the idle top frame excluded.
    pub fn frame_depth(&self) -> usize {
        let mut depth = 0;
        let mut cursor = self.frames;
        while !cursor.is_null() && cursor != self.top_frame {
            depth += 1;
            cursor = unsafe { (*cursor).frame().parent };
        }
        depth
    }

    pub fn last_exception(&self) -> Value {
        self.last_exception
    }

    /// Time since construction.
    pub fn uptime(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    /// The per-opcode profile, when the `instruction_profile` flag was set.
    pub fn instruction_profile(&self) -> Option<&InstructionProfile> {
        self.profile.as_ref()
    }

    /// The payload of an exception thrown from native code. Marks the
    /// machine as unwinding; the dispatcher resumes at the innermost catch
    /// table or halts the module.
    pub fn throw_exception(&mut self, payload: Value) {
        self.throw_value(payload);
    }

    // =========================================================================
    // Module and function execution
    // =========================================================================

    /// Wrap an instruction block in a module function and run it to
    /// completion, returning the module's result value.
    pub fn register_module(&mut self, block: Arc<InstructionBlock>) -> CoreResult<Value> {
        let name = self.symbols.intern("main");
        let lvarcount = block.lvarcount;
        let body = CodeAddress::new(block, 0);
        let context = self.top_frame;
        let cell = self.allocate_cell()?;
        let function = unsafe {
            (*cell.as_ptr()).init_function(FunctionCell {
                name,
                argc: 0,
                lvarcount,
                context,
                body,
                anonymous: false,
                bound_self: None,
                container: FxHashMap::default(),
            });
            (*cell.as_ptr()).as_value()
        };
        self.exec_function(function, Value::NULL)
    }

    /// Invoke a callable synchronously to completion, as the scheduler does
    /// for every task.
    pub fn exec_function(&mut self, function: Value, argument: Value) -> CoreResult<Value> {
        match type_of(function) {
            ValueType::Function => self.exec_script_function(function, &[argument]),
            ValueType::CFunction => {
                let declared_argc = {
                    let cell = function
                        .as_ptr::<MemoryCell>()
                        .ok_or_else(|| CoreError::malformed_bytecode("cfunction cell missing"))?;
                    unsafe { (*cell).cfunction().argc }
                };
                if declared_argc != crate::internals::VARIADIC_ARGC && declared_argc > 1 {
                    return Err(CoreError::uncaught_exception(format!(
                        "task callback expects {} arguments, tasks supply one",
                        declared_argc
                    )));
                }
                let mut scope = TempScope::new(&self.heap);
                scope.pin(function);
                scope.pin(argument);
                self.invoke_native(function, Value::NULL, &[argument])
            }
            _ => Err(CoreError::uncaught_exception(format!(
                "cannot invoke a value of type {}",
                type_of(function).name()
            ))),
        }
    }

    /// Push a frame for `function`, run the dispatcher until the frame
    /// returns, and pop the result.
    ///
    /// The catch stack is emptied for the duration: tasks, module bodies
    /// and constructor chains are exception boundaries, so a throw inside
    /// them can never unwind into the suspended outer code.
    pub(crate) fn exec_script_function(
        &mut self,
        function: Value,
        args: &[Value],
    ) -> CoreResult<Value> {
        let bound_self = {
            let cell = function
                .as_ptr::<MemoryCell>()
                .ok_or_else(|| CoreError::malformed_bytecode("exec target is not a function"))?;
            unsafe { (*cell).function().bound_self }
        };
        self.exec_with_self(function, args, bound_self.unwrap_or(Value::NULL))
    }

    // =========================================================================
    // Dispatch loop
    // =========================================================================

    pub(crate) fn run_loop(&mut self) -> CoreResult<()> {
        while !self.halted {
            let (opcode, base) = {
                let Some(ip) = self.ip.as_ref() else { break };
                let byte = ip.block.read_u8(ip.offset).ok_or_else(|| {
                    CoreError::malformed_bytecode(format!(
                        "instruction pointer past block end at {:#x}",
                        ip.offset
                    ))
                })?;
                let opcode = Opcode::from_byte(byte).ok_or_else(|| {
                    CoreError::malformed_bytecode(format!("unknown opcode {:#04x}", byte))
                })?;
                (opcode, ip.offset)
            };

            if self.flags.trace_opcodes {
                self.trace_opcode(opcode, base);
            }
            let profiled = if self.profile.is_some() {
                Some(Instant::now())
            } else {
                None
            };

            // Advance to the next instruction up front; branch, call,
            // return and throw handlers overwrite the ip from here.
            if let Some(ip) = self.ip.as_mut() {
                ip.offset = base + opcode.length();
            }

            self.execute(opcode, base)?;

            if let (Some(profile), Some(started)) = (self.profile.as_mut(), profiled) {
                profile.add_entry(opcode, started.elapsed());
            }
        }
        Ok(())
    }

    // Operand fetchers. These read from the current block at absolute
    // offsets, so they stay valid after the ip has advanced.

    fn fetch_u8(&self, at: usize) -> CoreResult<u8> {
        self.ip
            .as_ref()
            .and_then(|ip| ip.block.read_u8(at))
            .ok_or_else(|| CoreError::malformed_bytecode("truncated operand"))
    }

    fn fetch_u32(&self, at: usize) -> CoreResult<u32> {
        self.ip
            .as_ref()
            .and_then(|ip| ip.block.read_u32(at))
            .ok_or_else(|| CoreError::malformed_bytecode("truncated operand"))
    }

    fn fetch_i32(&self, at: usize) -> CoreResult<i32> {
        self.ip
            .as_ref()
            .and_then(|ip| ip.block.read_i32(at))
            .ok_or_else(|| CoreError::malformed_bytecode("truncated operand"))
    }

    fn fetch_u64(&self, at: usize) -> CoreResult<u64> {
        self.ip
            .as_ref()
            .and_then(|ip| ip.block.read_u64(at))
            .ok_or_else(|| CoreError::malformed_bytecode("truncated operand"))
    }

    fn execute(&mut self, opcode: Opcode, base: usize) -> CoreResult<()> {
        match opcode {
            Opcode::Halt => {
                self.halted = true;
                Ok(())
            }

            // Locals and self.
            Opcode::ReadLocal => {
                let index = self.fetch_u32(base + 1)?;
                let level = self.fetch_u8(base + 5)?;
                self.op_readlocal(index, level)
            }
            Opcode::SetLocal => {
                let index = self.fetch_u32(base + 1)?;
                let level = self.fetch_u8(base + 5)?;
                self.op_setlocal(index, level, false)
            }
            Opcode::SetLocalPush => {
                let index = self.fetch_u32(base + 1)?;
                let level = self.fetch_u8(base + 5)?;
                self.op_setlocal(index, level, true)
            }
            Opcode::PutSelf => {
                let level = self.fetch_u8(base + 1)?;
                self.op_putself(level)
            }

            // Members.
            Opcode::ReadMemberSymbol => {
                let symbol = Value::from_raw(self.fetch_u64(base + 1)?);
                self.op_readmembersymbol(symbol)
            }
            Opcode::SetMemberSymbol => {
                let symbol = Value::from_raw(self.fetch_u64(base + 1)?);
                self.op_setmembersymbol(symbol, false)
            }
            Opcode::SetMemberSymbolPush => {
                let symbol = Value::from_raw(self.fetch_u64(base + 1)?);
                self.op_setmembersymbol(symbol, true)
            }
            Opcode::ReadMemberValue => self.op_readmembervalue(),
            Opcode::SetMemberValue => self.op_setmembervalue(false),
            Opcode::SetMemberValuePush => self.op_setmembervalue(true),
            Opcode::ReadArrayIndex => {
                let index = self.fetch_u32(base + 1)?;
                self.op_readarrayindex(index)
            }
            Opcode::SetArrayIndex => {
                let index = self.fetch_u32(base + 1)?;
                self.op_setarrayindex(index, false)
            }
            Opcode::SetArrayIndexPush => {
                let index = self.fetch_u32(base + 1)?;
                self.op_setarrayindex(index, true)
            }

            // Literals and constructors.
            Opcode::PutValue => {
                let value = Value::from_raw(self.fetch_u64(base + 1)?);
                self.push_stack(value);
                Ok(())
            }
            Opcode::PutString => {
                let index = self.fetch_u32(base + 1)?;
                self.op_putstring(index)
            }
            Opcode::PutFunction => {
                let name = Value::from_raw(self.fetch_u64(base + 1)?);
                let body_offset = self.fetch_u32(base + 9)?;
                let anonymous = self.fetch_u8(base + 13)? != 0;
                let argc = self.fetch_u32(base + 14)?;
                let lvarcount = self.fetch_u32(base + 18)?;
                self.op_putfunction(name, body_offset, anonymous, argc, lvarcount)
            }
            Opcode::PutCFunction => {
                let name = Value::from_raw(self.fetch_u64(base + 1)?);
                let method = self.fetch_u32(base + 9)?;
                let argc = self.fetch_u32(base + 13)?;
                self.op_putcfunction(name, MethodId(method), argc)
            }
            Opcode::PutGenerator => {
                let name = Value::from_raw(self.fetch_u64(base + 1)?);
                let body_offset = self.fetch_u32(base + 9)?;
                let argc = self.fetch_u32(base + 13)?;
                let lvarcount = self.fetch_u32(base + 17)?;
                self.op_putgenerator(name, body_offset, argc, lvarcount)
            }
            Opcode::PutArray => {
                let count = self.fetch_u32(base + 1)?;
                self.op_putarray(count)
            }
            Opcode::PutHash => {
                let count = self.fetch_u32(base + 1)?;
                self.op_puthash(count)
            }
            Opcode::PutClass => {
                let name = Value::from_raw(self.fetch_u64(base + 1)?);
                let property_count = self.fetch_u32(base + 9)?;
                let static_property_count = self.fetch_u32(base + 13)?;
                let method_count = self.fetch_u32(base + 17)?;
                let static_method_count = self.fetch_u32(base + 21)?;
                let has_parent = self.fetch_u8(base + 25)? != 0;
                let has_constructor = self.fetch_u8(base + 26)? != 0;
                self.op_putclass(
                    name,
                    property_count,
                    static_property_count,
                    method_count,
                    static_method_count,
                    has_parent,
                    has_constructor,
                )
            }

            // Stack manipulation.
            Opcode::Pop => {
                self.pop_stack("pop")?;
                Ok(())
            }
            Opcode::Dup => {
                let top = *self
                    .stack
                    .last()
                    .ok_or(CoreError::StackUnderflow { opcode: "dup" })?;
                self.push_stack(top);
                Ok(())
            }
            Opcode::Dupn => {
                let count = self.fetch_u32(base + 1)? as usize;
                if self.stack.len() < count {
                    return Err(CoreError::StackUnderflow { opcode: "dupn" });
                }
                let from = self.stack.len() - count;
                for i in from..self.stack.len() {
                    let value = self.stack[i];
                    self.push_stack(value);
                }
                Ok(())
            }
            Opcode::Swap => {
                let len = self.stack.len();
                if len < 2 {
                    return Err(CoreError::StackUnderflow { opcode: "swap" });
                }
                self.stack.swap(len - 1, len - 2);
                Ok(())
            }

            // Calls and returns.
            Opcode::Call => {
                let argc = self.fetch_u32(base + 1)?;
                self.op_call(argc, false)
            }
            Opcode::CallMember => {
                let argc = self.fetch_u32(base + 1)?;
                self.op_call(argc, true)
            }
            Opcode::Return => self.op_return(),
            Opcode::Yield => self.op_yield(),
            Opcode::Throw => self.op_throw(),

            // Catch tables.
            Opcode::RegisterCatchTable => {
                let offset = self.fetch_i32(base + 1)?;
                self.op_registercatchtable(offset)
            }
            Opcode::PopCatchTable => self.op_popcatchtable(),

            // Branches.
            Opcode::Branch => {
                let offset = self.fetch_i32(base + 1)?;
                self.op_branch(offset)
            }
            Opcode::BranchIf => {
                let offset = self.fetch_i32(base + 1)?;
                self.op_branchif(offset)
            }
            Opcode::BranchUnless => {
                let offset = self.fetch_i32(base + 1)?;
                self.op_branchunless(offset)
            }
            Opcode::BranchLt
            | Opcode::BranchGt
            | Opcode::BranchLe
            | Opcode::BranchGe
            | Opcode::BranchEq
            | Opcode::BranchNeq => {
                let offset = self.fetch_i32(base + 1)?;
                self.op_branchcompare(opcode, offset)
            }

            // Operators.
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Mod
            | Opcode::Pow
            | Opcode::Shl
            | Opcode::Shr
            | Opcode::BAnd
            | Opcode::BOr
            | Opcode::BXor => self.op_binary(opcode),
            Opcode::UAdd | Opcode::USub | Opcode::UNot | Opcode::UBNot => self.op_unary(opcode),
            Opcode::Eq | Opcode::Neq | Opcode::Lt | Opcode::Gt | Opcode::Le | Opcode::Ge => {
                self.op_compare(opcode)
            }

            Opcode::TypeOf => self.op_typeof(),
        }
    }

    fn trace_opcode(&self, opcode: Opcode, offset: usize) {
        use std::io::Write;
        let mut err = self.err_stream.borrow_mut();
        if self.flags.verbose_addresses {
            if let Some(ip) = self.ip.as_ref() {
                let _ = writeln!(
                    err,
                    "{:p}+{:08x}: {}",
                    Arc::as_ptr(&ip.block),
                    offset,
                    opcode.name()
                );
                return;
            }
        }
        let _ = writeln!(err, "{:08x}: {}", offset, opcode.name());
    }
}

