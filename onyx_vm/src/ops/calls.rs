//! The call protocol.
//!
//! `call` and `callmember` pop their arguments and callee (and receiver)
//! off the stack, then dispatch on the callee type: script functions push
//! a frame and jump, cfunctions invoke through the internals registry,
//! classes instantiate and run the constructor chain, generators resume
//! their retained frame.

use crate::internals::VARIADIC_ARGC;
use crate::machine::VirtualMachine;
use onyx_core::{CoreError, CoreResult, Value, ValueType};
use onyx_gc::{type_of, MemoryCell, TempScope};
use smallvec::SmallVec;

impl VirtualMachine {
    pub(crate) fn op_call(&mut self, argc: u32, with_target: bool) -> CoreResult<()> {
        // Everything popped here leaves the root set; pin it all until the
        // callee has it reachable again.
        let mut scope = TempScope::new(&self.heap);

        let mut args: SmallVec<[Value; 8]> = SmallVec::with_capacity(argc as usize);
        for _ in 0..argc {
            args.push(self.pop_stack("call")?);
        }
        args.reverse();
        for &arg in &args {
            scope.pin(arg);
        }
        let callee = scope.pin(self.pop_stack("call")?);
        let target = if with_target {
            Some(scope.pin(self.pop_stack("callmember")?))
        } else {
            None
        };

        match type_of(callee) {
            ValueType::Function => self.call_function(callee, &args, target),
            ValueType::CFunction => self.call_cfunction(callee, &args, target),
            ValueType::Class => self.call_class(callee, &args),
            ValueType::Generator => self.call_generator(callee, &args),
            other => self.throw_message(&format!("cannot call a value of type {}", other.name())),
        }
    }

    // =========================================================================
    // Script functions
    // =========================================================================

    fn call_function(
        &mut self,
        function: Value,
        args: &[Value],
        target: Option<Value>,
    ) -> CoreResult<()> {
        let cell = function
            .as_ptr::<MemoryCell>()
            .ok_or_else(|| CoreError::malformed_bytecode("function cell missing"))?;
        let (declared_argc, lvarcount, context, body, bound_self, anonymous) = unsafe {
            let f = (*cell).function();
            (
                f.argc,
                f.lvarcount,
                f.context,
                f.body.clone(),
                f.bound_self,
                f.anonymous,
            )
        };

        if (args.len() as u32) < declared_argc {
            return self.throw_message(&format!(
                "not enough arguments: expected {}, got {}",
                declared_argc,
                args.len()
            ));
        }

        // Self resolution: an explicit bind wins, then the member-call
        // receiver; anonymous functions inherit the caller's self.
        let self_value = match bound_self {
            Some(bound) => bound,
            None => match target {
                Some(receiver) => receiver,
                None if anonymous && !self.frames.is_null() => unsafe {
                    (*self.frames).frame().self_value
                },
                None => Value::NULL,
            },
        };

        let environment = if context.is_null() {
            self.top_frame
        } else {
            context
        };
        let return_address = self.ip.clone();
        let frame =
            self.create_frame(self_value, function, lvarcount, environment, return_address, false)?;
        unsafe {
            let locals = &mut (*frame).frame_mut().locals;
            let count = args.len().min(locals.len());
            locals[..count].copy_from_slice(&args[..count]);
        }
        self.ip = Some(body);
        Ok(())
    }

    // =========================================================================
    // Native functions
    // =========================================================================

    fn call_cfunction(
        &mut self,
        cfunction: Value,
        args: &[Value],
        target: Option<Value>,
    ) -> CoreResult<()> {
        let cell = cfunction
            .as_ptr::<MemoryCell>()
            .ok_or_else(|| CoreError::malformed_bytecode("cfunction cell missing"))?;
        let (declared_argc, bound_self) = unsafe {
            let f = (*cell).cfunction();
            (f.argc, f.bound_self)
        };

        if declared_argc != VARIADIC_ARGC && args.len() as u32 != declared_argc {
            return self.throw_message(&format!(
                "incorrect argument count: expected {}, got {}",
                declared_argc,
                args.len()
            ));
        }

        let receiver = bound_self.or(target).unwrap_or(Value::NULL);

        self.native_unwound = false;
        let result = self.invoke_native(cfunction, receiver, args)?;
        // A throw from native code already rebuilt the stack for the catch
        // handler (or halted the module); the result has nowhere to go.
        if !std::mem::take(&mut self.native_unwound) {
            self.push_stack(result);
        }
        Ok(())
    }

    /// Resolve and invoke a cfunction's registry handle.
    pub(crate) fn invoke_native(
        &mut self,
        cfunction: Value,
        receiver: Value,
        args: &[Value],
    ) -> CoreResult<Value> {
        let method = {
            let cell = cfunction
                .as_ptr::<MemoryCell>()
                .ok_or_else(|| CoreError::malformed_bytecode("cfunction cell missing"))?;
            unsafe { (*cell).cfunction().method }
        };
        let func = self
            .internals
            .get(method)
            .ok_or_else(|| CoreError::malformed_bytecode("unknown internal method handle"))?
            .func;
        func(self, receiver, args)
    }

    // =========================================================================
    // Classes
    // =========================================================================

    fn call_class(&mut self, class: Value, args: &[Value]) -> CoreResult<()> {
        let mut scope = TempScope::new(&self.heap);

        // Ancestry, root first. Member properties and constructors both
        // apply in that order.
        let mut chain: SmallVec<[Value; 4]> = SmallVec::new();
        let mut cursor = class;
        while !cursor.is_null() {
            chain.push(cursor);
            let cell = cursor
                .as_ptr::<MemoryCell>()
                .ok_or_else(|| CoreError::malformed_bytecode("class cell missing"))?;
            cursor = unsafe { (*cell).class().parent_class };
        }
        chain.reverse();

        let object = scope.pin(self.create_object(class)?);
        self.initialize_member_properties(&chain, object)?;

        for (position, &ancestor) in chain.iter().enumerate() {
            let constructor = {
                let cell = ancestor
                    .as_ptr::<MemoryCell>()
                    .ok_or_else(|| CoreError::malformed_bytecode("class cell missing"))?;
                unsafe { (*cell).class().constructor }
            };
            if constructor.is_null() {
                continue;
            }
            // Only the leaf constructor sees the call arguments.
            let constructor_args = if position == chain.len() - 1 {
                args
            } else {
                &[]
            };
            self.exec_with_self(constructor, constructor_args, object)?;
            if !self.running {
                return Ok(());
            }
        }

        self.push_stack(object);
        Ok(())
    }

    /// Assign every member property symbol of the ancestry to null on a
    /// fresh instance, in declaration order.
    fn initialize_member_properties(&mut self, chain: &[Value], object: Value) -> CoreResult<()> {
        let object_cell = object
            .as_ptr::<MemoryCell>()
            .ok_or_else(|| CoreError::malformed_bytecode("object cell missing"))?;
        for &ancestor in chain {
            let cell = ancestor
                .as_ptr::<MemoryCell>()
                .ok_or_else(|| CoreError::malformed_bytecode("class cell missing"))?;
            unsafe {
                for index in 0..(*cell).class().member_properties.len() {
                    let symbol = (*cell).class().member_properties[index];
                    (*object_cell).object_mut().container.insert(symbol, Value::NULL);
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // Generators
    // =========================================================================

    fn call_generator(&mut self, generator: Value, args: &[Value]) -> CoreResult<()> {
        let cell = generator
            .as_ptr::<MemoryCell>()
            .ok_or_else(|| CoreError::malformed_bytecode("generator cell missing"))?;
        let (finished, frame, context, body, lvarcount, bound_self, resume) = unsafe {
            let g = (*cell).generator();
            (
                g.finished,
                g.frame,
                g.context,
                g.body.clone(),
                g.lvarcount,
                g.bound_self,
                g.resume_address.clone(),
            )
        };

        if finished {
            return self.throw_message("generator has already finished");
        }

        if frame.is_null() {
            // First invocation: build the retained frame.
            let environment = if context.is_null() {
                self.top_frame
            } else {
                context
            };
            let self_value = bound_self.unwrap_or(Value::NULL);
            let return_address = self.ip.clone();
            let frame = self.create_frame(
                self_value,
                generator,
                lvarcount,
                environment,
                return_address,
                false,
            )?;
            unsafe {
                let locals = &mut (*frame).frame_mut().locals;
                let count = args.len().min(locals.len());
                locals[..count].copy_from_slice(&args[..count]);
                (*cell).generator_mut().frame = frame;
                (*cell).generator_mut().stack_base = self.stack.len();
            }
            self.ip = Some(body);
        } else {
            // Resume: re-push the retained frame, restore the saved stack
            // segment and deliver the resume argument as the value of the
            // suspended yield expression.
            unsafe {
                let f = (*frame).frame_mut();
                f.return_address = self.ip.clone();
                f.parent = self.frames;
                f.last_active_catchtable = self.catchstack;
            }
            self.frames = frame;
            unsafe {
                let g = (*cell).generator_mut();
                g.stack_base = self.stack.len();
                let saved = std::mem::take(&mut g.saved_stack);
                self.stack.extend(saved);
            }
            self.push_stack(args.first().copied().unwrap_or(Value::NULL));
            self.ip = Some(resume.unwrap_or(body));
        }
        Ok(())
    }

    /// Run a function synchronously with an explicit self (constructor
    /// chains).
    pub(crate) fn exec_with_self(
        &mut self,
        function: Value,
        args: &[Value],
        self_value: Value,
    ) -> CoreResult<Value> {
        let mut scope = TempScope::new(&self.heap);
        scope.pin(function);
        scope.pin(self_value);
        for &arg in args {
            scope.pin(arg);
        }

        if type_of(function) != ValueType::Function {
            return Err(CoreError::malformed_bytecode("exec target is not a function"));
        }
        let (body, lvarcount, context) = {
            let cell = function
                .as_ptr::<MemoryCell>()
                .ok_or_else(|| CoreError::malformed_bytecode("exec target is not a function"))?;
            let f = unsafe { (*cell).function() };
            (f.body.clone(), f.lvarcount, f.context)
        };

        let saved_ip = self.ip.take();
        let saved_catchstack = self.catchstack;
        let saved_frames = self.frames;
        self.catchstack = std::ptr::null_mut();

        let environment = if context.is_null() {
            self.top_frame
        } else {
            context
        };
        let frame = self.create_frame(self_value, function, lvarcount, environment, None, true)?;
        unsafe {
            let locals = &mut (*frame).frame_mut().locals;
            let count = args.len().min(locals.len());
            locals[..count].copy_from_slice(&args[..count]);
        }

        self.ip = Some(body);
        self.halted = false;
        let outcome = self.run_loop();
        self.halted = false;
        self.ip = saved_ip;
        self.catchstack = saved_catchstack;
        // The frame normally pops itself on return; a mid-frame halt or an
        // exhausted unwind leaves the chain wherever it stopped.
        self.frames = saved_frames;

        outcome?;
        if let Some(rendered) = self.uncaught_exception.take() {
            return Err(CoreError::uncaught_exception(rendered));
        }
        Ok(self.stack.pop().unwrap_or(Value::NULL))
    }
}
