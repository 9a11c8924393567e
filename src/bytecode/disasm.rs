use crate::bytecode::{Op, ProgramBc};
use std::collections::BTreeSet;

/// Print disassembly of a bytecode program
pub fn print_bc(bc: &ProgramBc) {
    print!("{}", program_to_string(bc));
}

/// Return disassembly of every code object as a String
pub fn program_to_string(bc: &ProgramBc) -> String {
    let mut output = String::from("=== BYTECODE PROGRAM ===\n\n");

    for (ci, code) in bc.code.iter().enumerate() {
        let label = match bc.subroutines.iter().find(|(_, i)| **i == ci) {
            Some((id, _)) => format!("{} ({})", code.name, id),
            None => code.name.clone(),
        };

        output.push_str("════════════════════════════════════════\n");
        output.push_str(&format!(" {}\n", label));
        output.push_str(&format!(" {} instructions\n", code.ops.len()));
        output.push_str("════════════════════════════════════════\n");
        output.push_str(&disassemble_to_string(&code.ops));
        output.push('\n');
    }

    output
}

fn collect_jump_targets(ops: &[Op]) -> BTreeSet<usize> {
    let mut targets = BTreeSet::new();

    for (ip, op) in ops.iter().enumerate() {
        let offsets: &[i32] = match op {
            Op::Jump(offset) | Op::JumpIfFalse(offset) => {
                std::slice::from_ref(offset)
            }
            Op::Switch(offsets) => offsets,
            _ => &[],
        };

        for offset in offsets {
            targets.insert((ip as i64 + *offset as i64) as usize);
        }
    }

    targets
}

// =============================================================================
// String output (for testing/logging)
// =============================================================================

/// Return disassembly as a String
pub fn disassemble_to_string(ops: &[Op]) -> String {
    let mut output = String::new();
    let jump_targets = collect_jump_targets(ops);

    for (ip, op) in ops.iter().enumerate() {
        if jump_targets.contains(&ip) {
            output.push_str("      ┌──────────────────────────────────\n");
        }

        output.push_str(&format!("{:04} ", ip));

        if jump_targets.contains(&ip) {
            output.push_str("► ");
        } else {
            output.push_str("  ");
        }

        output.push_str(&format_op_string(op, ip));
        output.push('\n');
    }

    if jump_targets.contains(&ops.len()) {
        output.push_str(&format!("{:04} ► (end)\n", ops.len()));
    }

    output
}

fn target(ip: usize, offset: i32) -> String {
    let target = ip as i64 + offset as i64;
    let direction = if offset < 0 { "↑" } else { "↓" };
    format!("{:+} {} (→ {:04})", offset, direction, target)
}

fn format_op_string(op: &Op, ip: usize) -> String {
    match op {
        Op::PushInt(n) => format!("INT         {}", n),
        Op::PushBytes(_) => format!("BYTE        {}", &op.to_string()[5..]),
        Op::Load(slot) => format!("LOAD        {}", slot),
        Op::Store(slot) => format!("STORE       {}", slot),
        Op::Loads => "LOADS       ; ( i -- x )".to_string(),
        Op::Stores => "STORES      ; ( i x -- )".to_string(),
        Op::Jump(offset) => format!("JUMP        {}", target(ip, *offset)),
        Op::JumpIfFalse(offset) => format!("JUMP_FALSE  {}", target(ip, *offset)),
        Op::Switch(offsets) => {
            let arms: Vec<String> = offsets
                .iter()
                .map(|o| format!("{:04}", ip as i64 + *o as i64))
                .collect();
            format!("SWITCH      [{}]", arms.join(", "))
        }
        Op::CallSub(id) => format!("CALLSUB     {}", id),
        Op::RetSub => "RETSUB".to_string(),
        Op::Return => "RETURN".to_string(),
        other => format!("{:?}", other).to_uppercase(),
    }
}
