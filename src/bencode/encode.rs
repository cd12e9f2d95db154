use super::error::BencodeError;
use super::value::Value;
use std::io::Write;

/// Encodes a value in canonical form (dictionary keys sorted).
pub fn encode(value: &Value) -> Result<Vec<u8>, BencodeError> {
    let mut buf = Vec::with_capacity(encoded_len(value));
    write_value(value, &mut buf)?;
    Ok(buf)
}

/// Size in bytes of the canonical encoding, without encoding.
///
/// Gossip casts are trimmed against the 10 KiB limit with this.
pub fn encoded_len(value: &Value) -> usize {
    match value {
        Value::Integer(i) => 2 + decimal_len(*i),
        Value::Bytes(b) => string_len(b.len()),
        Value::List(items) => 2 + items.iter().map(encoded_len).sum::<usize>(),
        Value::Dict(dict) => {
            2 + dict
                .iter()
                .map(|(k, v)| string_len(k.len()) + encoded_len(v))
                .sum::<usize>()
        }
    }
}

fn string_len(len: usize) -> usize {
    decimal_len(len as i64) + 1 + len
}

fn decimal_len(i: i64) -> usize {
    let sign = usize::from(i < 0);
    let mut n = i.unsigned_abs();
    let mut digits = 1;
    while n >= 10 {
        n /= 10;
        digits += 1;
    }
    sign + digits
}

fn write_value<W: Write>(value: &Value, out: &mut W) -> Result<(), BencodeError> {
    match value {
        Value::Integer(i) => write!(out, "i{}e", i)?,
        Value::Bytes(b) => {
            write!(out, "{}:", b.len())?;
            out.write_all(b)?;
        }
        Value::List(items) => {
            out.write_all(b"l")?;
            for item in items {
                write_value(item, out)?;
            }
            out.write_all(b"e")?;
        }
        Value::Dict(dict) => {
            out.write_all(b"d")?;
            for (key, val) in dict {
                write!(out, "{}:", key.len())?;
                out.write_all(key)?;
                write_value(val, out)?;
            }
            out.write_all(b"e")?;
        }
    }
    Ok(())
}
