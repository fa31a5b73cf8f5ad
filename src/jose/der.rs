//! A minimal DER reader: enough of a tag/length/value walk to locate curve
//! OIDs and the SubjectPublicKeyInfo inside SPKI, PKCS#8 and X.509 inputs.
//! Multi-byte tags and long-form lengths are handled; indefinite lengths are
//! not valid DER and are rejected.

use super::KeyError;

pub const CLASS_CONTEXT: u8 = 0b10;

#[derive(Debug, Clone, Copy)]
pub struct Tlv<'a> {
    pub class: u8,
    pub constructed: bool,
    pub number: u32,
    /// The complete encoding, header included.
    pub raw: &'a [u8],
    pub content: &'a [u8],
}

impl<'a> Tlv<'a> {
    pub fn is_universal(&self, number: u32) -> bool {
        self.class == 0 && self.number == number
    }

    pub fn is_context(&self, number: u32) -> bool {
        self.class == CLASS_CONTEXT && self.number == number
    }
}

pub struct DerReader<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> DerReader<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    pub fn done(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn byte(&mut self) -> Result<u8, KeyError> {
        let b = *self
            .input
            .get(self.pos)
            .ok_or(KeyError::InvalidAsn1("truncated element"))?;
        self.pos += 1;
        Ok(b)
    }

    pub fn read(&mut self) -> Result<Tlv<'a>, KeyError> {
        let start = self.pos;
        let first = self.byte()?;
        let class = first >> 6;
        let constructed = first & 0x20 != 0;
        let mut number = u32::from(first & 0x1f);
        if number == 0x1f {
            // High tag number form: base-128 continuation bytes.
            number = 0;
            loop {
                let b = self.byte()?;
                number = number
                    .checked_mul(128)
                    .and_then(|n| n.checked_add(u32::from(b & 0x7f)))
                    .ok_or(KeyError::InvalidAsn1("tag number overflow"))?;
                if b & 0x80 == 0 {
                    break;
                }
            }
        }

        let first_len = self.byte()?;
        let length = if first_len & 0x80 == 0 {
            usize::from(first_len)
        } else {
            let count = usize::from(first_len & 0x7f);
            if count == 0 {
                return Err(KeyError::InvalidAsn1("indefinite length"));
            }
            if count > 4 {
                return Err(KeyError::InvalidAsn1("length too large"));
            }
            let mut length = 0usize;
            for _ in 0..count {
                length = (length << 8) | usize::from(self.byte()?);
            }
            length
        };

        let content_start = self.pos;
        let content_end = content_start
            .checked_add(length)
            .ok_or(KeyError::InvalidAsn1("length overflow"))?;
        if content_end > self.input.len() {
            return Err(KeyError::InvalidAsn1("content past end of input"));
        }
        self.pos = content_end;
        Ok(Tlv {
            class,
            constructed,
            number,
            raw: &self.input[start..content_end],
            content: &self.input[content_start..content_end],
        })
    }
}

/// Parse `der` as a single constructed element and return its children.
pub fn children(der: &[u8]) -> Result<Vec<Tlv<'_>>, KeyError> {
    let mut outer = DerReader::new(der);
    let element = outer.read()?;
    if !outer.done() {
        return Err(KeyError::InvalidAsn1("trailing bytes after element"));
    }
    if !element.constructed {
        return Err(KeyError::InvalidAsn1("expected a constructed element"));
    }
    elements(element.content)
}

/// Read consecutive elements until `content` is exhausted.
pub fn elements(content: &[u8]) -> Result<Vec<Tlv<'_>>, KeyError> {
    let mut reader = DerReader::new(content);
    let mut out = Vec::new();
    while !reader.done() {
        out.push(reader.read()?);
    }
    Ok(out)
}

/// Dotted-decimal form of an OBJECT IDENTIFIER's content bytes.
pub fn oid_to_string(content: &[u8]) -> Result<String, KeyError> {
    if content.is_empty() {
        return Err(KeyError::InvalidAsn1("empty OID"));
    }
    let mut parts: Vec<u64> = vec![u64::from(content[0]) / 40, u64::from(content[0]) % 40];
    let mut acc: u64 = 0;
    for &b in &content[1..] {
        acc = acc
            .checked_mul(128)
            .and_then(|n| n.checked_add(u64::from(b & 0x7f)))
            .ok_or(KeyError::InvalidAsn1("OID arc overflow"))?;
        if b & 0x80 == 0 {
            parts.push(acc);
            acc = 0;
        }
    }
    if acc != 0 {
        return Err(KeyError::InvalidAsn1("truncated OID arc"));
    }
    Ok(parts
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join("."))
}

pub const TAG_INTEGER: u32 = 0x02;
pub const TAG_BIT_STRING: u32 = 0x03;
pub const TAG_OCTET_STRING: u32 = 0x04;
pub const TAG_OID: u32 = 0x06;
pub const TAG_SEQUENCE: u32 = 0x10;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walks_a_sequence() {
        // SEQUENCE { INTEGER 1, OID 1.2.840.10045.2.1 }
        let der = hex::decode("300c02010106072a8648ce3d0201").unwrap();
        let elems = children(&der).unwrap();
        assert_eq!(elems.len(), 2);
        assert!(elems[0].is_universal(TAG_INTEGER));
        assert_eq!(elems[0].content, &[1]);
        assert!(elems[1].is_universal(TAG_OID));
        assert_eq!(oid_to_string(elems[1].content).unwrap(), "1.2.840.10045.2.1");
    }

    #[test]
    fn long_form_length() {
        let mut der = vec![0x30, 0x82, 0x01, 0x00];
        der.extend((0..128).flat_map(|_| [0x05, 0x00]));
        let elems = children(&der).unwrap();
        assert_eq!(elems.len(), 128);
    }

    #[test]
    fn multi_byte_tag() {
        // Context-specific tag 65 (0x1f escape), primitive, empty content.
        let der = [0x9f, 0x41, 0x00];
        let tlv = DerReader::new(&der).read().unwrap();
        assert_eq!(tlv.class, CLASS_CONTEXT);
        assert_eq!(tlv.number, 65);
        assert!(tlv.content.is_empty());
    }

    #[test]
    fn truncated_content_is_rejected() {
        assert_eq!(
            DerReader::new(&[0x30, 0x05, 0x01]).read().unwrap_err(),
            KeyError::InvalidAsn1("content past end of input")
        );
    }

    #[test]
    fn indefinite_length_is_rejected() {
        assert_eq!(
            DerReader::new(&[0x30, 0x80, 0x00, 0x00]).read().unwrap_err(),
            KeyError::InvalidAsn1("indefinite length")
        );
    }
}
