use super::{CborError, Value};

const MAX_NESTING: usize = 128;

/// Decode a single CBOR item, rejecting trailing bytes.
pub fn decode(input: &[u8]) -> Result<Value, CborError> {
    let (value, used) = decode_prefix(input)?;
    if used != input.len() {
        return Err(CborError::TrailingBytes(input.len() - used));
    }
    Ok(value)
}

/// Decode a single CBOR item from the front of `input`, returning the item
/// and the number of bytes consumed.
pub fn decode_prefix(input: &[u8]) -> Result<(Value, usize), CborError> {
    let mut reader = Reader { input, pos: 0 };
    let value = reader.item(0)?;
    Ok((value, reader.pos))
}

struct Reader<'a> {
    input: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn byte(&mut self) -> Result<u8, CborError> {
        let b = *self.input.get(self.pos).ok_or(CborError::TruncatedInput)?;
        self.pos += 1;
        Ok(b)
    }

    fn take(&mut self, len: usize) -> Result<&[u8], CborError> {
        let end = self.pos.checked_add(len).ok_or(CborError::IntegerOverflow)?;
        if end > self.input.len() {
            return Err(CborError::TruncatedInput);
        }
        let slice = &self.input[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// Read the argument for the given additional-information bits.
    fn argument(&mut self, info: u8) -> Result<u64, CborError> {
        match info {
            0..=23 => Ok(u64::from(info)),
            24 => Ok(u64::from(self.byte()?)),
            25 => {
                let b = self.take(2)?;
                Ok(u64::from(u16::from_be_bytes([b[0], b[1]])))
            }
            26 => {
                let b = self.take(4)?;
                Ok(u64::from(u32::from_be_bytes([b[0], b[1], b[2], b[3]])))
            }
            27 => {
                let b = self.take(8)?;
                Ok(u64::from_be_bytes([
                    b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
                ]))
            }
            28..=30 => Err(CborError::InvalidMajorType(info)),
            31 => Err(CborError::UnsupportedIndefiniteForm),
            _ => unreachable!("additional information is 5 bits"),
        }
    }

    fn length(&mut self, info: u8) -> Result<usize, CborError> {
        let arg = self.argument(info)?;
        usize::try_from(arg).map_err(|_| CborError::IntegerOverflow)
    }

    fn item(&mut self, depth: usize) -> Result<Value, CborError> {
        if depth > MAX_NESTING {
            return Err(CborError::NestingTooDeep);
        }
        let initial = self.byte()?;
        let major = initial >> 5;
        let info = initial & 0x1f;
        match major {
            0 => Ok(Value::Unsigned(self.argument(info)?)),
            1 => Ok(Value::Negative(self.argument(info)?)),
            2 => {
                let len = self.length(info)?;
                Ok(Value::Bytes(self.take(len)?.to_vec()))
            }
            3 => {
                let len = self.length(info)?;
                let raw = self.take(len)?.to_vec();
                String::from_utf8(raw)
                    .map(Value::Text)
                    .map_err(|_| CborError::InvalidUtf8)
            }
            4 => {
                let len = self.length(info)?;
                let mut items = Vec::with_capacity(len.min(64));
                for _ in 0..len {
                    items.push(self.item(depth + 1)?);
                }
                Ok(Value::Array(items))
            }
            5 => {
                let len = self.length(info)?;
                let mut entries = Vec::with_capacity(len.min(64));
                for _ in 0..len {
                    let key = self.item(depth + 1)?;
                    let value = self.item(depth + 1)?;
                    entries.push((key, value));
                }
                Ok(Value::Map(entries))
            }
            6 => {
                let tag = self.argument(info)?;
                let content = self.item(depth + 1)?;
                super::tag::check_builtin(tag, &content)?;
                Ok(Value::Tag(tag, Box::new(content)))
            }
            7 => self.major_seven(info),
            _ => unreachable!("major type is 3 bits"),
        }
    }

    fn major_seven(&mut self, info: u8) -> Result<Value, CborError> {
        match info {
            20 => Ok(Value::Bool(false)),
            21 => Ok(Value::Bool(true)),
            22 => Ok(Value::Null),
            23 => Ok(Value::Undefined),
            0..=19 => Ok(Value::Simple(info)),
            24 => {
                let simple = self.byte()?;
                if simple < 32 {
                    return Err(CborError::InvalidSimple(simple));
                }
                Ok(Value::Simple(simple))
            }
            25 => {
                let b = self.take(2)?;
                Ok(Value::Float(half_to_double(u16::from_be_bytes([
                    b[0], b[1],
                ]))))
            }
            26 => {
                let b = self.take(4)?;
                Ok(Value::Float(f64::from(f32::from_be_bytes([
                    b[0], b[1], b[2], b[3],
                ]))))
            }
            27 => {
                let b = self.take(8)?;
                Ok(Value::Float(f64::from_be_bytes([
                    b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
                ])))
            }
            28..=30 => Err(CborError::InvalidMajorType(info)),
            31 => Err(CborError::UnsupportedIndefiniteForm),
            _ => unreachable!(),
        }
    }
}

/// Expand an IEEE 754 half-precision value (RFC 8949 appendix D).
pub(super) fn half_to_double(half: u16) -> f64 {
    let exp = (half >> 10) & 0x1f;
    let mant = f64::from(half & 0x3ff);
    let magnitude = match exp {
        0 => mant * 2f64.powi(-24),
        31 => {
            if mant == 0.0 {
                f64::INFINITY
            } else {
                f64::NAN
            }
        }
        _ => (mant + 1024.0) * 2f64.powi(i32::from(exp) - 25),
    };
    if half & 0x8000 != 0 {
        -magnitude
    } else {
        magnitude
    }
}
