use super::Value;

/// Deterministic encoding: shortest-form arguments, definite lengths,
/// shortest faithful float representation, map entries in insertion order.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    write_value(&mut out, value);
    out
}

fn write_value(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Unsigned(n) => write_head(out, 0, *n),
        Value::Negative(n) => write_head(out, 1, *n),
        Value::Bytes(b) => {
            write_head(out, 2, b.len() as u64);
            out.extend_from_slice(b);
        }
        Value::Text(s) => {
            write_head(out, 3, s.len() as u64);
            out.extend_from_slice(s.as_bytes());
        }
        Value::Array(items) => {
            write_head(out, 4, items.len() as u64);
            for item in items {
                write_value(out, item);
            }
        }
        Value::Map(entries) => {
            write_head(out, 5, entries.len() as u64);
            for (key, val) in entries {
                write_value(out, key);
                write_value(out, val);
            }
        }
        Value::Tag(tag, content) => {
            write_head(out, 6, *tag);
            write_value(out, content);
        }
        Value::Bool(false) => out.push(0xf4),
        Value::Bool(true) => out.push(0xf5),
        Value::Null => out.push(0xf6),
        Value::Undefined => out.push(0xf7),
        Value::Simple(n) => {
            if *n < 24 {
                out.push(0xe0 | n);
            } else {
                out.push(0xf8);
                out.push(*n);
            }
        }
        Value::Float(f) => write_float(out, *f),
    }
}

fn write_head(out: &mut Vec<u8>, major: u8, arg: u64) {
    let major = major << 5;
    if arg < 24 {
        out.push(major | arg as u8);
    } else if arg <= u64::from(u8::MAX) {
        out.push(major | 24);
        out.push(arg as u8);
    } else if arg <= u64::from(u16::MAX) {
        out.push(major | 25);
        out.extend_from_slice(&(arg as u16).to_be_bytes());
    } else if arg <= u64::from(u32::MAX) {
        out.push(major | 26);
        out.extend_from_slice(&(arg as u32).to_be_bytes());
    } else {
        out.push(major | 27);
        out.extend_from_slice(&arg.to_be_bytes());
    }
}

fn write_float(out: &mut Vec<u8>, value: f64) {
    if let Some(half) = double_to_half(value) {
        out.push(0xf9);
        out.extend_from_slice(&half.to_be_bytes());
        return;
    }
    let single = value as f32;
    if f64::from(single) == value {
        out.push(0xfa);
        out.extend_from_slice(&single.to_be_bytes());
        return;
    }
    out.push(0xfb);
    out.extend_from_slice(&value.to_be_bytes());
}

/// Half-precision bits for `value`, if the conversion is exact.
fn double_to_half(value: f64) -> Option<u16> {
    let single = value as f32;
    if !value.is_nan() && f64::from(single) != value {
        return None;
    }
    let bits = single.to_bits();
    let sign = ((bits >> 16) & 0x8000) as u16;
    let exp = ((bits >> 23) & 0xff) as i32;
    let mant = bits & 0x007f_ffff;
    if exp == 0xff {
        // Infinities and the canonical quiet NaN.
        return Some(sign | 0x7c00 | if mant != 0 { 0x0200 } else { 0 });
    }
    let half_exp = exp - 127 + 15;
    if half_exp >= 31 {
        return None;
    }
    if half_exp <= 0 {
        if half_exp < -10 {
            return if value == 0.0 { Some(sign) } else { None };
        }
        let full = mant | 0x0080_0000;
        let shift = 14 - half_exp;
        if full & ((1u32 << shift) - 1) != 0 {
            return None;
        }
        return Some(sign | (full >> shift) as u16);
    }
    if mant & 0x1fff != 0 {
        return None;
    }
    Some(sign | ((half_exp as u16) << 10) | (mant >> 13) as u16)
}
