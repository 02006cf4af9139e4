use std::fmt;

const ROW: usize = 16;

/// Hex and ASCII view of a byte slice, formatted only when the event that
/// carries it is actually recorded.
pub struct Hexdump<'a>(pub &'a [u8]);

impl fmt::Display for Hexdump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (row, chunk) in self.0.chunks(ROW).enumerate() {
            write!(f, "{:08x} ", row * ROW)?;
            for i in 0..ROW {
                match chunk.get(i) {
                    Some(byte) => write!(f, " {byte:02x}")?,
                    None => f.write_str("   ")?,
                }
            }
            f.write_str("  |")?;
            for &byte in chunk {
                let shown = if byte.is_ascii_graphic() || byte == b' ' {
                    byte as char
                } else {
                    '.'
                };
                write!(f, "{shown}")?;
            }
            f.write_str("|\n")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_bytes_show_as_dots() {
        let dump = Hexdump(b"ls\r").to_string();
        assert!(dump.starts_with("00000000  6c 73 0d "));
        assert!(dump.ends_with("|ls.|\n"));
    }

    #[test]
    fn long_input_wraps_every_sixteen_bytes() {
        let dump = Hexdump(&[b'a'; 20]).to_string();
        let rows: Vec<&str> = dump.lines().collect();
        assert_eq!(rows.len(), 2);
        assert!(rows[1].starts_with("00000010  61 61 61 61 "));
    }
}
