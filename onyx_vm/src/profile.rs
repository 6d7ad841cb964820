//! Per-opcode execution profile.

use onyx_core::bytecode::{Opcode, OPCODE_COUNT};
use std::io::Write;
use std::time::Duration;

/// Running average for one opcode.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProfileEntry {
    pub encountered: u64,
    pub average_nanos: u64,
}

/// Counts how often each instruction ran and how long it took on average.
/// Enabled by the `instruction_profile` runtime flag.
pub struct InstructionProfile {
    entries: [ProfileEntry; OPCODE_COUNT],
}

impl Default for InstructionProfile {
    fn default() -> InstructionProfile {
        InstructionProfile {
            entries: [ProfileEntry::default(); OPCODE_COUNT],
        }
    }
}

impl InstructionProfile {
    pub fn new() -> InstructionProfile {
        InstructionProfile::default()
    }

    pub fn add_entry(&mut self, opcode: Opcode, duration: Duration) {
        let entry = &mut self.entries[opcode as usize];
        let nanos = duration.as_nanos() as u64;
        entry.average_nanos =
            (entry.average_nanos * entry.encountered + nanos) / (entry.encountered + 1);
        entry.encountered += 1;
    }

    pub fn entry(&self, opcode: Opcode) -> ProfileEntry {
        self.entries[opcode as usize]
    }

    /// Dump all encountered opcodes, most frequent first.
    pub fn report(&self, io: &mut dyn Write) -> std::io::Result<()> {
        let mut rows: Vec<(Opcode, ProfileEntry)> = (0..OPCODE_COUNT as u8)
            .filter_map(Opcode::from_byte)
            .map(|op| (op, self.entries[op as usize]))
            .filter(|(_, e)| e.encountered > 0)
            .collect();
        rows.sort_by_key(|(_, e)| std::cmp::Reverse(e.encountered));

        writeln!(io, "{:<24} {:>12} {:>14}", "opcode", "count", "avg (ns)")?;
        for (opcode, entry) in rows {
            writeln!(
                io,
                "{:<24} {:>12} {:>14}",
                opcode.name(),
                entry.encountered,
                entry.average_nanos
            )?;
        }
        Ok(())
    }
}
