// String library over byte positions (1-based, negatives count from the
// end): len, sub, upper, lower, rep, reverse, byte, char, format.
// The pattern engine (find/match/gsub) lives outside the core.

use crate::gc::ThreadId;
use crate::lib_registry::LibraryModule;
use crate::lua_value::format_g;
use crate::lua_vm::{LuaResult, LuaVM};
use crate::stdlib::basic::tostring_value;

pub fn create_string_lib() -> LibraryModule {
    crate::lib_module!("string", {
        "len" => str_len,
        "sub" => str_sub,
        "upper" => str_upper,
        "lower" => str_lower,
        "rep" => str_rep,
        "reverse" => str_reverse,
        "byte" => str_byte,
        "char" => str_char,
        "format" => str_format,
    })
    .with_initializer(|vm| {
        // Strings index into the string table: s:upper() etc.
        let t = vm.current_thread();
        let lib = vm.get_global("string");
        let mt = vm.create_table(0, 1);
        let mt_id = mt.as_table_id().expect("fresh table value");
        let key = vm.new_string("__index");
        vm.table_raw_set(t, mt_id, key, lib)?;
        let probe = vm.new_string("");
        vm.set_metatable_of(&probe, Some(mt_id));
        Ok(())
    })
}

/// Relative position translation: 1-based, negatives from the end.
fn pos_relative(pos: i64, len: usize) -> i64 {
    if pos >= 0 { pos } else { len as i64 + pos + 1 }
}

fn str_len(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let s = vm.check_arg_string(t, 1, "len")?;
    vm.push_number(t, s.len() as f64)?;
    Ok(1)
}

fn str_sub(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let s = vm.check_arg_string(t, 1, "sub")?;
    let bytes = s.as_bytes();
    let len = bytes.len();
    let i = vm.arg(t, 2).and_then(|v| v.as_number()).unwrap_or(1.0) as i64;
    let j = vm.arg(t, 3).and_then(|v| v.as_number()).unwrap_or(-1.0) as i64;
    let start = pos_relative(i, len).max(1);
    let end = pos_relative(j, len).min(len as i64);
    let out = if start <= end {
        String::from_utf8_lossy(&bytes[start as usize - 1..end as usize]).into_owned()
    } else {
        String::new()
    };
    vm.push_string(t, &out)?;
    Ok(1)
}

fn str_upper(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let s = vm.check_arg_string(t, 1, "upper")?;
    vm.push_string(t, &s.to_uppercase())?;
    Ok(1)
}

fn str_lower(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let s = vm.check_arg_string(t, 1, "lower")?;
    vm.push_string(t, &s.to_lowercase())?;
    Ok(1)
}

fn str_rep(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let s = vm.check_arg_string(t, 1, "rep")?;
    let n = vm.check_arg_number(t, 2, "rep")? as i64;
    let out = if n > 0 {
        s.repeat(n as usize)
    } else {
        String::new()
    };
    vm.push_string(t, &out)?;
    Ok(1)
}

fn str_reverse(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let s = vm.check_arg_string(t, 1, "reverse")?;
    let mut bytes = s.into_bytes();
    bytes.reverse();
    let out = String::from_utf8_lossy(&bytes).into_owned();
    vm.push_string(t, &out)?;
    Ok(1)
}

fn str_byte(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let s = vm.check_arg_string(t, 1, "byte")?;
    let bytes = s.as_bytes();
    let len = bytes.len();
    let i = vm.arg(t, 2).and_then(|v| v.as_number()).unwrap_or(1.0) as i64;
    let j = vm
        .arg(t, 3)
        .and_then(|v| v.as_number())
        .unwrap_or(i as f64) as i64;
    let start = pos_relative(i, len).max(1);
    let end = pos_relative(j, len).min(len as i64);
    let mut n = 0;
    for p in start..=end {
        if p >= 1 {
            vm.push_number(t, bytes[p as usize - 1] as f64)?;
            n += 1;
        }
    }
    Ok(n)
}

fn str_char(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let n = vm.arg_count(t);
    let mut bytes = Vec::with_capacity(n);
    for i in 1..=n {
        let c = vm.check_arg_number(t, i, "char")? as i64;
        if !(0..=255).contains(&c) {
            return Err(vm.throw_runtime(
                t,
                format!("bad argument #{} to 'char' (invalid value)", i),
            ));
        }
        bytes.push(c as u8);
    }
    let out = String::from_utf8_lossy(&bytes).into_owned();
    vm.push_string(t, &out)?;
    Ok(1)
}

struct FormatSpec {
    minus: bool,
    zero: bool,
    width: usize,
    precision: Option<usize>,
}

fn pad(spec: &FormatSpec, body: String) -> String {
    if body.len() >= spec.width {
        return body;
    }
    let fill = spec.width - body.len();
    if spec.minus {
        let mut s = body;
        s.push_str(&" ".repeat(fill));
        s
    } else if spec.zero && !body.starts_with('-') {
        format!("{}{}", "0".repeat(fill), body)
    } else if spec.zero {
        // Keep the sign in front of the zeros.
        format!("-{}{}", "0".repeat(fill), &body[1..])
    } else {
        format!("{}{}", " ".repeat(fill), body)
    }
}

fn quote_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for b in s.bytes() {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            0 => out.push_str("\\0"),
            _ => out.push(b as char),
        }
    }
    out.push('"');
    out
}

fn str_format(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let fmt = vm.check_arg_string(t, 1, "format")?;
    let mut out = String::with_capacity(fmt.len());
    let mut argn = 1;
    let mut chars = fmt.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }
        let mut spec = FormatSpec {
            minus: false,
            zero: false,
            width: 0,
            precision: None,
        };
        while let Some(&f) = chars.peek() {
            match f {
                '-' => spec.minus = true,
                '0' => spec.zero = true,
                '+' | ' ' | '#' => {}
                _ => break,
            }
            chars.next();
        }
        while let Some(&d) = chars.peek() {
            if d.is_ascii_digit() {
                spec.width = spec.width * 10 + d.to_digit(10).unwrap_or(0) as usize;
                chars.next();
            } else {
                break;
            }
        }
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut p = 0;
            while let Some(&d) = chars.peek() {
                if d.is_ascii_digit() {
                    p = p * 10 + d.to_digit(10).unwrap_or(0) as usize;
                    chars.next();
                } else {
                    break;
                }
            }
            spec.precision = Some(p);
        }
        let conv = chars.next().ok_or_else(|| {
            vm.throw_runtime(t, "invalid format string to 'format'".to_string())
        })?;
        argn += 1;
        let body = match conv {
            'd' | 'i' | 'u' => {
                let x = vm.check_arg_number(t, argn, "format")?;
                let mut buf = itoa::Buffer::new();
                buf.format(x as i64).to_string()
            }
            'c' => {
                let x = vm.check_arg_number(t, argn, "format")? as i64;
                ((x & 0xff) as u8 as char).to_string()
            }
            'x' => {
                let x = vm.check_arg_number(t, argn, "format")?;
                format!("{:x}", x as i64)
            }
            'X' => {
                let x = vm.check_arg_number(t, argn, "format")?;
                format!("{:X}", x as i64)
            }
            'o' => {
                let x = vm.check_arg_number(t, argn, "format")?;
                format!("{:o}", x as i64)
            }
            'e' => {
                let x = vm.check_arg_number(t, argn, "format")?;
                format!("{:.*e}", spec.precision.unwrap_or(6), x)
            }
            'E' => {
                let x = vm.check_arg_number(t, argn, "format")?;
                format!("{:.*e}", spec.precision.unwrap_or(6), x).to_uppercase()
            }
            'f' => {
                let x = vm.check_arg_number(t, argn, "format")?;
                format!("{:.*}", spec.precision.unwrap_or(6), x)
            }
            'g' | 'G' => {
                let x = vm.check_arg_number(t, argn, "format")?;
                let s = format_g(x, spec.precision.unwrap_or(6).max(1));
                if conv == 'G' { s.to_uppercase() } else { s }
            }
            's' => {
                let v = vm.arg_or_nil(t, argn);
                let mut s = tostring_value(vm, t, &v)?;
                if let Some(p) = spec.precision {
                    s.truncate(p);
                }
                s
            }
            'q' => {
                let s = vm.check_arg_string(t, argn, "format")?;
                quote_string(&s)
            }
            _ => {
                return Err(vm.throw_runtime(
                    t,
                    format!("invalid option '%{}' to 'format'", conv),
                ));
            }
        };
        out.push_str(&pad(&spec, body));
    }
    vm.push_string(t, &out)?;
    Ok(1)
}
