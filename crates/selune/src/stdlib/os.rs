// OS library: clock, time, date, difftime, getenv.

use std::cell::RefCell;
use std::time::Instant;

use chrono::{DateTime, Datelike, Local, TimeZone, Timelike, Utc};

use crate::gc::ThreadId;
use crate::lib_registry::LibraryModule;
use crate::lua_value::LuaValue;
use crate::lua_vm::{LuaResult, LuaVM};

pub fn create_os_lib() -> LibraryModule {
    crate::lib_module!("os", {
        "clock" => os_clock,
        "time" => os_time,
        "date" => os_date,
        "difftime" => os_difftime,
        "getenv" => os_getenv,
    })
}

fn os_clock(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    thread_local! {
        static START: RefCell<Option<Instant>> = const { RefCell::new(None) };
    }
    let secs = START.with(|s| {
        let mut s = s.borrow_mut();
        let start = s.get_or_insert_with(Instant::now);
        start.elapsed().as_secs_f64()
    });
    vm.push_number(t, secs)?;
    Ok(1)
}

fn os_time(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let stamp = match vm.arg(t, 1).and_then(|v| v.as_table_id()) {
        Some(tid) => {
            let get = |vm: &mut LuaVM, name: &str| -> Option<f64> {
                let key = vm.new_string(name);
                vm.table_raw_get(tid, &key).as_number()
            };
            let year = get(vm, "year").unwrap_or(1970.0) as i32;
            let month = get(vm, "month").unwrap_or(1.0) as u32;
            let day = get(vm, "day").unwrap_or(1.0) as u32;
            let hour = get(vm, "hour").unwrap_or(12.0) as u32;
            let min = get(vm, "min").unwrap_or(0.0) as u32;
            let sec = get(vm, "sec").unwrap_or(0.0) as u32;
            match Local.with_ymd_and_hms(year, month, day, hour, min, sec) {
                chrono::LocalResult::Single(dt) => dt.timestamp() as f64,
                _ => {
                    vm.push_nil(t)?;
                    return Ok(1);
                }
            }
        }
        None => Utc::now().timestamp() as f64,
    };
    vm.push_number(t, stamp)?;
    Ok(1)
}

fn os_date(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let fmt = match vm.arg(t, 1) {
        Some(v) if !v.is_nil() => vm.check_arg_string(t, 1, "date")?,
        _ => "%c".to_string(),
    };
    let when = match vm.arg(t, 2).and_then(|v| v.as_number()) {
        Some(n) => n as i64,
        None => Utc::now().timestamp(),
    };
    let (fmt, utc) = match fmt.strip_prefix('!') {
        Some(rest) => (rest.to_string(), true),
        None => (fmt, false),
    };
    if fmt.starts_with("*t") {
        let dt: DateTime<Utc> = Utc
            .timestamp_opt(when, 0)
            .single()
            .unwrap_or_else(|| Utc.timestamp_opt(0, 0).single().expect("epoch is valid"));
        let out = vm.create_table(0, 8);
        let tid = out.as_table_id().expect("fresh table value");
        let mut set = |vm: &mut LuaVM, name: &str, v: f64| -> LuaResult<()> {
            let key = vm.new_string(name);
            vm.table_raw_set(t, tid, key, LuaValue::Number(v))
        };
        set(vm, "year", dt.year() as f64)?;
        set(vm, "month", dt.month() as f64)?;
        set(vm, "day", dt.day() as f64)?;
        set(vm, "hour", dt.hour() as f64)?;
        set(vm, "min", dt.minute() as f64)?;
        set(vm, "sec", dt.second() as f64)?;
        set(vm, "wday", dt.weekday().number_from_sunday() as f64)?;
        set(vm, "yday", dt.ordinal() as f64)?;
        vm.push_value(t, out)?;
        return Ok(1);
    }
    let rendered = if utc {
        let dt = Utc
            .timestamp_opt(when, 0)
            .single()
            .unwrap_or_else(|| Utc.timestamp_opt(0, 0).single().expect("epoch is valid"));
        dt.format(&fmt).to_string()
    } else {
        let dt = Local
            .timestamp_opt(when, 0)
            .single()
            .unwrap_or_else(|| Local.timestamp_opt(0, 0).single().expect("epoch is valid"));
        dt.format(&fmt).to_string()
    };
    vm.push_string(t, &rendered)?;
    Ok(1)
}

fn os_difftime(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let t2 = vm.check_arg_number(t, 1, "difftime")?;
    let t1 = vm.arg(t, 2).and_then(|v| v.as_number()).unwrap_or(0.0);
    vm.push_number(t, t2 - t1)?;
    Ok(1)
}

fn os_getenv(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let name = vm.check_arg_string(t, 1, "getenv")?;
    match std::env::var(&name) {
        Ok(v) => vm.push_string(t, &v)?,
        Err(_) => vm.push_nil(t)?,
    }
    Ok(1)
}
