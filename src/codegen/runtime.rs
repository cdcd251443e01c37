//! Support routines linked into every compiled program.
//!
//! All stack traffic of lowered code goes through these helpers so bound checks live in one
//! place. Faults print `<kind> at instruction <position>` on stderr and exit with the fault's
//! exit code, the same report the interpreter produces.

use std::fmt;

use crate::{
    errors::{FAILURE_EXIT_CODE, Fault},
    session::Limits,
};

pub(crate) fn fault_symbol(fault: Fault) -> &'static str {
    match fault {
        Fault::StackUnderflow => "@slang.msg.underflow",
        Fault::StackOverflow => "@slang.msg.overflow",
        Fault::DivisionByZero => "@slang.msg.divzero",
    }
}

/// Writes a private NUL-terminated byte array named `symbol`.
fn c_string(f: &mut fmt::Formatter<'_>, symbol: &str, text: &str) -> fmt::Result {
    write!(
        f,
        "{symbol} = private unnamed_addr constant [{} x i8] c\"",
        text.len() + 1
    )?;
    for byte in text.bytes() {
        match byte {
            b'"' | b'\\' => write!(f, "\\{byte:02X}")?,
            0x20..=0x7e => write!(f, "{}", byte as char)?,
            _ => write!(f, "\\{byte:02X}")?,
        }
    }
    writeln!(f, "\\00\"")
}

pub(crate) fn fault_call(fault: Fault, position: &str) -> String {
    format!(
        "call void @slang.fault(ptr {}, i64 {position}, i32 {})",
        fault_symbol(fault),
        fault.exit_code()
    )
}

pub(crate) fn slot_symbol(slot: usize) -> String {
    format!("@slang.slot.{slot}")
}

pub(crate) fn undefined_symbol(slot: usize) -> String {
    format!("@slang.msg.undefined.{slot}")
}

/// One global per callable name plus the message reported when it is called while unbound.
pub(crate) fn write_slots(f: &mut fmt::Formatter<'_>, slots: &[String]) -> fmt::Result {
    for (slot, name) in slots.iter().enumerate() {
        writeln!(f, "{} = internal global ptr null", slot_symbol(slot))?;
        c_string(
            f,
            &undefined_symbol(slot),
            &format!("undefined function {name:?}"),
        )?;
    }
    Ok(())
}

pub(crate) fn write_prelude(f: &mut fmt::Formatter<'_>, limits: Limits) -> fmt::Result {
    let capacity = limits.stack_capacity;
    let max_depth = limits.max_call_depth;
    let underflow = fault_call(Fault::StackUnderflow, "%pos");
    let overflow = fault_call(Fault::StackOverflow, "%pos");
    let divzero = fault_call(Fault::DivisionByZero, "%pos");

    writeln!(f)?;
    c_string(f, "@slang.fmt.dump", "%lld\n")?;
    c_string(f, "@slang.fmt.fault", "%s at instruction %lld\n")?;
    for fault in Fault::ALL {
        c_string(f, fault_symbol(fault), fault.message())?;
    }
    writeln!(f, "@slang.depth = internal global i64 0")?;

    write!(
        f,
        r#"
declare i32 @printf(ptr, ...)
declare i32 @dprintf(i32, ptr, ...)
declare i32 @fflush(ptr)
declare void @exit(i32) noreturn

define internal void @slang.fault(ptr %msg, i64 %pos, i32 %code) noreturn {{
entry:
  %flushed = call i32 @fflush(ptr null)
  %written = call i32 (i32, ptr, ...) @dprintf(i32 2, ptr @slang.fmt.fault, ptr %msg, i64 %pos)
  call void @exit(i32 %code)
  unreachable
}}

define internal void @slang.push(ptr %stack, ptr %sp, i64 %value, i64 %pos) {{
entry:
  %len = load i64, ptr %sp
  %full = icmp sge i64 %len, {capacity}
  br i1 %full, label %overflow, label %store
overflow:
  {overflow}
  unreachable
store:
  %slot = getelementptr inbounds i64, ptr %stack, i64 %len
  store i64 %value, ptr %slot
  %next = add i64 %len, 1
  store i64 %next, ptr %sp
  ret void
}}

define internal i64 @slang.pop(ptr %stack, ptr %sp, i64 %pos) {{
entry:
  %len = load i64, ptr %sp
  %empty = icmp eq i64 %len, 0
  br i1 %empty, label %underflow, label %load
underflow:
  {underflow}
  unreachable
load:
  %top = sub i64 %len, 1
  %slot = getelementptr inbounds i64, ptr %stack, i64 %top
  %value = load i64, ptr %slot
  store i64 %top, ptr %sp
  ret i64 %value
}}

define internal i64 @slang.peek(ptr %stack, ptr %sp, i64 %depth, i64 %pos) {{
entry:
  %len = load i64, ptr %sp
  %short = icmp slt i64 %len, %depth
  br i1 %short, label %underflow, label %load
underflow:
  {underflow}
  unreachable
load:
  %index = sub i64 %len, %depth
  %slot = getelementptr inbounds i64, ptr %stack, i64 %index
  %value = load i64, ptr %slot
  ret i64 %value
}}

define internal void @slang.flip(ptr %stack, ptr %sp, i64 %pos) {{
entry:
  %len = load i64, ptr %sp
  %empty = icmp eq i64 %len, 0
  br i1 %empty, label %underflow, label %swap
underflow:
  {underflow}
  unreachable
swap:
  %top = sub i64 %len, 1
  %top.slot = getelementptr inbounds i64, ptr %stack, i64 %top
  %top.value = load i64, ptr %top.slot
  %bottom.value = load i64, ptr %stack
  store i64 %top.value, ptr %stack
  store i64 %bottom.value, ptr %top.slot
  ret void
}}

define internal i64 @slang.div(i64 %lhs, i64 %rhs, i64 %pos) {{
entry:
  %zero = icmp eq i64 %rhs, 0
  br i1 %zero, label %divzero, label %check
divzero:
  {divzero}
  unreachable
check:
  %negate = icmp eq i64 %rhs, -1
  br i1 %negate, label %wrap, label %divide
wrap:
  %negated = sub i64 0, %lhs
  ret i64 %negated
divide:
  %quotient = sdiv i64 %lhs, %rhs
  ret i64 %quotient
}}

define internal void @slang.enter(i64 %pos) {{
entry:
  %depth = load i64, ptr @slang.depth
  %deep = icmp sge i64 %depth, {max_depth}
  br i1 %deep, label %overflow, label %enter
overflow:
  {overflow}
  unreachable
enter:
  %next = add i64 %depth, 1
  store i64 %next, ptr @slang.depth
  ret void
}}

define internal ptr @slang.resolve(ptr %slot, ptr %msg, i64 %pos) {{
entry:
  %callee = load ptr, ptr %slot
  %missing = icmp eq ptr %callee, null
  br i1 %missing, label %undefined, label %found
undefined:
  call void @slang.fault(ptr %msg, i64 %pos, i32 {FAILURE_EXIT_CODE})
  unreachable
found:
  ret ptr %callee
}}

define internal void @slang.leave() {{
entry:
  %depth = load i64, ptr @slang.depth
  %next = sub i64 %depth, 1
  store i64 %next, ptr @slang.depth
  ret void
}}
"#
    )
}
