//! Value rendering, stacktraces and stack dumps.

use crate::machine::VirtualMachine;
use onyx_core::{Value, ValueType};
use onyx_gc::{type_of, MemoryCell};
use std::io::Write;

impl VirtualMachine {
    /// Render a value for display: string contents are unquoted, numbers
    /// print naturally, containers recurse with a cycle guard.
    pub fn render_to_string(&self, value: Value) -> String {
        let mut out = String::new();
        let mut seen: Vec<u64> = Vec::new();
        self.render_value(value, &mut out, &mut seen, false);
        out
    }

    /// Like [`render_to_string`], but strings are quoted; the form used
    /// for container elements and stack dumps.
    ///
    /// [`render_to_string`]: VirtualMachine::render_to_string
    pub fn inspect_to_string(&self, value: Value) -> String {
        let mut out = String::new();
        let mut seen: Vec<u64> = Vec::new();
        self.render_value(value, &mut out, &mut seen, true);
        out
    }

    fn render_value(&self, value: Value, out: &mut String, seen: &mut Vec<u64>, quoted: bool) {
        use std::fmt::Write as _;

        match type_of(value) {
            ValueType::Integer => {
                let _ = write!(out, "{}", value.decode_integer());
            }
            ValueType::Float => {
                let number = onyx_gc::numeric_value(value).unwrap_or(f64::NAN);
                let _ = write!(out, "{}", number);
            }
            ValueType::Boolean => {
                out.push_str(if value.is_true() { "true" } else { "false" });
            }
            ValueType::Null => out.push_str("null"),
            ValueType::Symbol => out.push_str(self.symbols.display(value)),
            ValueType::String => {
                let cell = match value.as_ptr::<MemoryCell>() {
                    Some(cell) => cell,
                    None => return,
                };
                let text = unsafe { (*cell).string_str() };
                if quoted {
                    let _ = write!(out, "{:?}", text);
                } else {
                    out.push_str(text);
                }
            }
            ValueType::Object => {
                let address = value.raw();
                if seen.contains(&address) {
                    out.push_str("{...}");
                    return;
                }
                seen.push(address);
                let cell = match value.as_ptr::<MemoryCell>() {
                    Some(cell) => cell,
                    None => return,
                };
                out.push('{');
                let mut first = true;
                unsafe {
                    for (&key, &member) in (*cell).object().container.iter() {
                        if !first {
                            out.push_str(", ");
                        }
                        first = false;
                        out.push_str(self.symbols.display(key));
                        out.push_str(": ");
                        self.render_value(member, out, seen, true);
                    }
                }
                out.push('}');
                seen.pop();
            }
            ValueType::Array => {
                let address = value.raw();
                if seen.contains(&address) {
                    out.push_str("[...]");
                    return;
                }
                seen.push(address);
                let cell = match value.as_ptr::<MemoryCell>() {
                    Some(cell) => cell,
                    None => return,
                };
                out.push('[');
                unsafe {
                    for (index, &element) in (*cell).array().data.iter().enumerate() {
                        if index > 0 {
                            out.push_str(", ");
                        }
                        self.render_value(element, out, seen, true);
                    }
                }
                out.push(']');
                seen.pop();
            }
            ValueType::Function | ValueType::CFunction | ValueType::Generator => {
                let _ = write!(out, "<{} {}>", type_of(value).name(), self.function_name(value));
            }
            ValueType::Class => {
                let name = value
                    .as_ptr::<MemoryCell>()
                    .map(|cell| unsafe { (*cell).class().name })
                    .map(|sym| self.symbols.display(sym).to_owned())
                    .unwrap_or_default();
                let _ = write!(out, "<class {}>", name);
            }
            ValueType::CPointer => out.push_str("<cpointer>"),
            ValueType::Frame => out.push_str("<frame>"),
            ValueType::CatchTable => out.push_str("<catchtable>"),
            ValueType::Dead => out.push_str("<dead>"),
        }
    }

    /// Printable name of a Function, CFunction or Generator value.
    pub(crate) fn function_name(&self, function: Value) -> String {
        let Some(cell) = function.as_ptr::<MemoryCell>() else {
            return "<main>".to_owned();
        };
        let name = unsafe {
            match (*cell).cell_type() {
                ValueType::Function => (*cell).function().name,
                ValueType::CFunction => (*cell).cfunction().name,
                ValueType::Generator => (*cell).generator().name,
                _ => return "<main>".to_owned(),
            }
        };
        self.symbols.display(name).to_owned()
    }

    /// Write one line per active frame, innermost first.
    pub fn stacktrace(&self, io: &mut dyn Write) -> std::io::Result<()> {
        let mut cursor = self.frames;
        while !cursor.is_null() && cursor != self.top_frame {
            let (function, return_offset) = unsafe {
                let frame = (*cursor).frame();
                (
                    frame.function,
                    frame.return_address.as_ref().map(|a| a.offset),
                )
            };
            match return_offset {
                Some(offset) => writeln!(
                    io,
                    "  at {} (return {:#x})",
                    self.function_name(function),
                    offset
                )?,
                None => writeln!(io, "  at {}", self.function_name(function))?,
            }
            cursor = unsafe { (*cursor).frame().parent };
        }
        Ok(())
    }

    /// Write the catch-stack, innermost first.
    pub fn catchstacktrace(&self, io: &mut dyn Write) -> std::io::Result<()> {
        let mut cursor = self.catchstack;
        let mut depth = 0;
        while !cursor.is_null() {
            let (offset, stacksize) = unsafe {
                let table = (*cursor).catchtable();
                (table.address.offset, table.stacksize)
            };
            writeln!(
                io,
                "  {}: resume {:#x}, stack height {}",
                depth, offset, stacksize
            )?;
            cursor = unsafe { (*cursor).catchtable().parent };
            depth += 1;
        }
        Ok(())
    }

    /// Dump the operand stack, top first.
    pub fn stackdump(&self, io: &mut dyn Write) -> std::io::Result<()> {
        for (index, &value) in self.stack.iter().enumerate().rev() {
            writeln!(io, "  {}: {}", index, self.inspect_to_string(value))?;
        }
        Ok(())
    }

    /// Uncaught-exception report on the error stream.
    pub(crate) fn print_stacktrace_to_err(&self) {
        let mut err = self.err_stream.borrow_mut();
        let _ = writeln!(err, "Uncaught exception:");
        let _ = self.stacktrace(&mut *err);
    }

    /// Build a script-visible stacktrace: an array of frame descriptions,
    /// innermost first.
    pub fn stacktrace_array(&mut self) -> onyx_core::CoreResult<Value> {
        let mut scope = onyx_gc::TempScope::new(&self.heap);
        let array = scope.pin(self.create_array(4)?);

        let mut names: Vec<String> = Vec::new();
        let mut cursor = self.frames;
        while !cursor.is_null() && cursor != self.top_frame {
            let function = unsafe { (*cursor).frame().function };
            names.push(self.function_name(function));
            cursor = unsafe { (*cursor).frame().parent };
        }

        for name in names {
            let line = self.create_string(&name)?;
            let cell = array
                .as_ptr::<MemoryCell>()
                .ok_or_else(|| onyx_core::CoreError::malformed_bytecode("array cell missing"))?;
            unsafe {
                (*cell).array_mut().data.push(line);
            }
        }
        Ok(array)
    }
}
