// Math library over f64, plus the VM's random generator.
// abs, ceil, floor, sqrt, max, min, fmod, modf, pow, random, randomseed,
// huge, pi.

use crate::gc::ThreadId;
use crate::lib_registry::LibraryModule;
use crate::lua_value::LuaValue;
use crate::lua_vm::{LuaResult, LuaVM};

/// xoshiro256** generator owned by the VM, so `math.random` sequences
/// are per-instance and reseedable.
pub(crate) struct Rng {
    s: [u64; 4],
}

impl Rng {
    pub(crate) fn from_clock() -> Self {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::SystemTime::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x9e3779b97f4a7c15);
        Self::from_seed(nanos)
    }

    pub(crate) fn from_seed(seed: u64) -> Self {
        // splitmix64 expansion of the seed into the state words.
        let mut x = seed;
        let mut next = || {
            x = x.wrapping_add(0x9e3779b97f4a7c15);
            let mut z = x;
            z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
            z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
            z ^ (z >> 31)
        };
        Rng {
            s: [next(), next(), next(), next()],
        }
    }

    pub(crate) fn reseed(&mut self, seed: u64) {
        *self = Self::from_seed(seed);
    }

    fn next_u64(&mut self) -> u64 {
        let result = self.s[1]
            .wrapping_mul(5)
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.s[1] << 17;
        self.s[2] ^= self.s[0];
        self.s[3] ^= self.s[1];
        self.s[1] ^= self.s[2];
        self.s[0] ^= self.s[3];
        self.s[2] ^= t;
        self.s[3] = self.s[3].rotate_left(45);
        result
    }

    /// Uniform in [0, 1).
    pub(crate) fn next_float(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }
}

pub fn create_math_lib() -> LibraryModule {
    crate::lib_module!("math", {
        "abs" => math_abs,
        "ceil" => math_ceil,
        "floor" => math_floor,
        "sqrt" => math_sqrt,
        "max" => math_max,
        "min" => math_min,
        "fmod" => math_fmod,
        "modf" => math_modf,
        "pow" => math_pow,
        "random" => math_random,
        "randomseed" => math_randomseed,
    })
    .with_value("pi", |_| LuaValue::Number(std::f64::consts::PI))
    .with_value("huge", |_| LuaValue::Number(f64::INFINITY))
}

fn unary(
    vm: &mut LuaVM,
    t: ThreadId,
    fname: &str,
    f: impl FnOnce(f64) -> f64,
) -> LuaResult<usize> {
    let x = vm.check_arg_number(t, 1, fname)?;
    vm.push_number(t, f(x))?;
    Ok(1)
}

fn math_abs(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    unary(vm, t, "abs", f64::abs)
}

fn math_ceil(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    unary(vm, t, "ceil", f64::ceil)
}

fn math_floor(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    unary(vm, t, "floor", f64::floor)
}

fn math_sqrt(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    unary(vm, t, "sqrt", f64::sqrt)
}

fn math_max(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let n = vm.arg_count(t);
    let mut best = vm.check_arg_number(t, 1, "max")?;
    for i in 2..=n {
        let x = vm.check_arg_number(t, i, "max")?;
        if x > best {
            best = x;
        }
    }
    vm.push_number(t, best)?;
    Ok(1)
}

fn math_min(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let n = vm.arg_count(t);
    let mut best = vm.check_arg_number(t, 1, "min")?;
    for i in 2..=n {
        let x = vm.check_arg_number(t, i, "min")?;
        if x < best {
            best = x;
        }
    }
    vm.push_number(t, best)?;
    Ok(1)
}

fn math_fmod(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let x = vm.check_arg_number(t, 1, "fmod")?;
    let y = vm.check_arg_number(t, 2, "fmod")?;
    vm.push_number(t, x % y)?;
    Ok(1)
}

fn math_modf(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let x = vm.check_arg_number(t, 1, "modf")?;
    let int = x.trunc();
    vm.push_number(t, int)?;
    vm.push_number(t, x - int)?;
    Ok(2)
}

fn math_pow(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let x = vm.check_arg_number(t, 1, "pow")?;
    let y = vm.check_arg_number(t, 2, "pow")?;
    vm.push_number(t, x.powf(y))?;
    Ok(1)
}

fn math_random(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let r = vm.rng.next_float();
    let n = vm.arg_count(t);
    let out = match n {
        0 => r,
        1 => {
            let m = vm.check_arg_number(t, 1, "random")?;
            if m < 1.0 {
                return Err(vm.throw_runtime(
                    t,
                    "bad argument #1 to 'random' (interval is empty)".to_string(),
                ));
            }
            (r * m).floor() + 1.0
        }
        _ => {
            let lo = vm.check_arg_number(t, 1, "random")?;
            let hi = vm.check_arg_number(t, 2, "random")?;
            if lo > hi {
                return Err(vm.throw_runtime(
                    t,
                    "bad argument #2 to 'random' (interval is empty)".to_string(),
                ));
            }
            (r * (hi - lo + 1.0)).floor() + lo
        }
    };
    vm.push_number(t, out)?;
    Ok(1)
}

fn math_randomseed(vm: &mut LuaVM, t: ThreadId) -> LuaResult<usize> {
    let seed = vm.check_arg_number(t, 1, "randomseed")?;
    vm.rng.reseed(seed.to_bits());
    Ok(0)
}
