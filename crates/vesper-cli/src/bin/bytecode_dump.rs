//! `bytecode_dump`: disassembles a source file's compiled prototype tree.
//!
//! Grounded on the teacher's `luars_interpreter::bin::bytecode_dump`
//! (per-function header line, one disassembled instruction per line with a
//! `; comment` for constant/jump-target operands, recursive dump of nested
//! prototypes), rewritten against Vesper's own `OpCode`/`Format`/`ConstantRef`
//! rather than the teacher's Lua-5.5-specific opcode table.

use std::env;
use std::fs;

use vesper_core::value::function::{ConstantRef, Prototype};
use vesper_core::vm::opcode::{self, Format, OpCode};

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        println!("Usage: bytecode_dump <source_file>");
        std::process::exit(0);
    }
    let filename = &args[1];
    let source = match fs::read_to_string(filename) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error reading file '{filename}': {e}");
            std::process::exit(1);
        }
    };

    match vesper_core::compiler::compile(&source, filename) {
        Ok(proto) => dump_proto(&proto, filename, true),
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}

fn format_constant(proto: &Prototype, idx: u32) -> String {
    match proto.constants.get(idx as usize) {
        Some(ConstantRef::Integer(i)) => i.to_string(),
        Some(ConstantRef::Float(f)) => f.to_string(),
        Some(ConstantRef::String(sidx)) => {
            let raw = proto.string_constants.get(*sidx as usize).map(String::as_str).unwrap_or("");
            let mut escaped = String::new();
            for ch in raw.chars() {
                match ch {
                    '\\' => escaped.push_str("\\\\"),
                    '\n' => escaped.push_str("\\n"),
                    '\t' => escaped.push_str("\\t"),
                    '"' => escaped.push_str("\\\""),
                    c => escaped.push(c),
                }
            }
            format!("\"{escaped}\"")
        }
        None => format!("?({idx})"),
    }
}

fn dump_proto(proto: &Prototype, filename: &str, is_main: bool) {
    let name = if is_main {
        format!("main <{filename}>")
    } else {
        format!("function {} <{filename}>", proto.name.as_deref().unwrap_or("?"))
    };
    println!("\n{name} ({} instructions)", proto.bytecode.len());
    println!(
        "{}{} params, {} slots, {} upvalue{}, {} constant{}, {} function{}",
        proto.num_params,
        if proto.is_vararg { "+" } else { "" },
        proto.max_stack_size,
        proto.upvalue_descs.len(),
        if proto.upvalue_descs.len() != 1 { "s" } else { "" },
        proto.constants.len(),
        if proto.constants.len() != 1 { "s" } else { "" },
        proto.nested.len(),
        if proto.nested.len() != 1 { "s" } else { "" },
    );

    for (pc, &inst) in proto.bytecode.iter().enumerate() {
        let op = opcode::get_op(inst);
        let a = opcode::get_a(inst);
        let (line, col) = proto.line_at(pc);

        let (args, comment) = match op.format() {
            Format::ABx => {
                let bx = opcode::get_bx(inst);
                let comment = match op {
                    OpCode::LoadK => format!(" ; {}", format_constant(proto, bx)),
                    OpCode::GetGlobal | OpCode::SetGlobal => format!(" ; {}", format_constant(proto, bx)),
                    OpCode::Closure => format!(" ; nested#{bx}"),
                    _ => String::new(),
                };
                (format!("{a} {bx}"), comment)
            }
            Format::AsBx => {
                let sbx = opcode::get_sbx(inst);
                (format!("{a} {sbx}"), String::new())
            }
            Format::SJ => {
                let sj = opcode::get_sj(inst);
                let target = (pc as isize + 1 + sj as isize) as usize;
                (String::new(), format!(" ; to {target}"))
            }
            Format::Ax => {
                let ax = opcode::get_ax(inst);
                (format!("{ax}"), String::new())
            }
            Format::ABC => {
                let b = opcode::get_b(inst);
                let c = opcode::get_c(inst);
                let k = opcode::get_k(inst);
                let k_str = if k { "k" } else { "" };
                let comment = match op {
                    OpCode::GetField | OpCode::SetField => format!(" ; {}", format_constant(proto, c)),
                    _ => String::new(),
                };
                (format!("{a} {b} {c}{k_str}"), comment)
            }
        };

        println!("\t{}\t[{line}:{col}]\t{:<10}\t{args}{comment}", pc + 1, format!("{op:?}"));
    }

    if !proto.constants.is_empty() {
        println!("constants ({}) for {name}:", proto.constants.len());
        for (idx, _) in proto.constants.iter().enumerate() {
            println!("\t{idx}\t{}", format_constant(proto, idx as u32));
        }
    }

    for nested in &proto.nested {
        dump_proto(nested, filename, false);
    }
}
