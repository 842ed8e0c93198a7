//! Formatting helpers for command output.

use std::fmt::Write as _;

use memgate_core::types::Address;

const BYTES_PER_LINE: usize = 16;

/// Classic offset / hex / ASCII dump, one line per 16 bytes
pub fn hexdump(base: Address, bytes: &[u8]) -> String
{
    let mut out = String::new();
    for (index, chunk) in bytes.chunks(BYTES_PER_LINE).enumerate() {
        let address = base + (index * BYTES_PER_LINE) as u64;
        let _ = write!(out, "{address}  ");

        for column in 0..BYTES_PER_LINE {
            match chunk.get(column) {
                Some(byte) => {
                    let _ = write!(out, "{byte:02x} ");
                }
                None => out.push_str("   "),
            }
            if column == 7 {
                out.push(' ');
            }
        }

        out.push_str(" |");
        out.extend(chunk.iter().map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                char::from(b)
            } else {
                '.'
            }
        }));
        out.push_str("|\n");
    }
    out
}

/// Parse operator-typed bytes: `deadbeef`, `de ad be ef`, `0xde,0xad`
pub fn parse_hex_bytes(input: &str) -> Result<Vec<u8>, String>
{
    let digits: String = input
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|token| !token.is_empty())
        .map(|token| token.trim_start_matches("0x").trim_start_matches("0X"))
        .collect();

    if digits.is_empty() {
        return Err("no bytes given".to_string());
    }
    if !digits.is_ascii() {
        return Err(format!("invalid hex in {input:?}"));
    }
    if digits.len() % 2 != 0 {
        return Err(format!("odd number of hex digits in {input:?}"));
    }

    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16).map_err(|_| format!("invalid hex byte {:?}", &digits[i..i + 2]))
        })
        .collect()
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_parse_hex_bytes()
    {
        assert_eq!(parse_hex_bytes("deadbeef").unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(parse_hex_bytes("de ad  be ef").unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(parse_hex_bytes("0x01,0x02").unwrap(), vec![0x01, 0x02]);
        assert!(parse_hex_bytes("").is_err());
        assert!(parse_hex_bytes("abc").is_err());
        assert!(parse_hex_bytes("zz").is_err());
    }

    #[test]
    fn test_hexdump_layout()
    {
        let bytes: Vec<u8> = (0x41..0x41 + 20).collect();
        let dump = hexdump(Address::new(0x1000), &bytes);
        let lines: Vec<&str> = dump.lines().collect();

        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("0x0000000000001000  41 42"));
        assert!(lines[0].ends_with("|ABCDEFGHIJKLMNOP|"));
        assert!(lines[1].starts_with("0x0000000000001010  51 52 53 54"));
        assert!(lines[1].ends_with("|QRST|"));
    }

    #[test]
    fn test_hexdump_masks_control_bytes()
    {
        let dump = hexdump(Address::new(0), &[0x00, 0x0a, 0x7f, b'a']);
        assert!(dump.trim_end().ends_with("|...a|"));
    }
}
