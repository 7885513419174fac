//! ASCII codec for the matrix switcher's serial protocol.
//!
//! Wire format:
//! ```text
//! route command   <OutputLetter><InputNumber>\r        e.g. "C4\r"
//! status query    m\r
//! status reply    m\r**** MATRIX STATUS ****\rMonA: {DviIn=3 , Hpd=0 , ...}\r...
//! ```
//! Outputs are addressed by an uppercase letter (`A` = output 0).  Inputs are
//! sent and reported one-based (`1` = input 0).
//!
//! Decoding is tolerant: the device emits occasional noise, so
//! any line that does not look like a status line is skipped rather than
//! failing the whole reply.

use thiserror::Error;
use tracing::debug;

use crate::domain::routing::{Route, RoutingTable};

pub use crate::domain::routing::MAX_OUTPUTS;

/// Number of bytes requested when reading back a status reply.
pub const STATUS_READBACK_LEN: usize = 673;

/// Header line the device prints before the per-output status lines.
pub const STATUS_HEADER: &str = "**** MATRIX STATUS ****";

const CR: char = '\r';
const STATUS_QUERY: &[u8] = b"m\r";
const LINE_PREFIX: &str = "Mon";
const INPUT_FIELD: &str = ": {DviIn=";

/// Errors raised by the encoders.
///
/// Callers validate indices against the matrix size before encoding, so this
/// only surfaces on a contract violation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Only outputs `0..26` have a letter on the wire.
    #[error("output index {output} cannot be addressed (at most {max} outputs)")]
    OutputOutOfRange { output: usize, max: usize },
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Builds the command that routes `input` to `output`.
///
/// # Errors
///
/// Returns [`ProtocolError::OutputOutOfRange`] if `output >= 26`.
///
/// # Examples
///
/// ```rust
/// use dvimatrix_core::encode_route;
///
/// assert_eq!(encode_route(3, 2).unwrap(), b"C4\r".to_vec());
/// assert_eq!(encode_route(11, 0).unwrap(), b"A12\r".to_vec());
/// ```
pub fn encode_route(input: usize, output: usize) -> Result<Vec<u8>, ProtocolError> {
    let letter = output_letter(output)?;
    let mut command = String::with_capacity(4);
    command.push(letter);
    command.push_str(&(input + 1).to_string());
    command.push(CR);
    Ok(command.into_bytes())
}

/// Builds the status query command (`m\r`).
pub fn encode_status_query() -> Vec<u8> {
    STATUS_QUERY.to_vec()
}

/// Decodes a status reply into the routing table it reports.
///
/// The reply is split on carriage returns and every line matching
/// `Mon<LETTERS>: {DviIn=<DIGITS> ,…}` contributes one route.  All other
/// lines are skipped, as are matching lines whose fields do not map to a
/// valid index (multi-letter output ids, `DviIn=0`, numeric overflow).
/// An empty reply yields an empty table.
///
/// # Examples
///
/// ```rust
/// use dvimatrix_core::{decode_status_response, RoutingTable};
///
/// let reply = "m\r**** MATRIX STATUS ****\r\
///              MonA: {DviIn=3 , Hpd=0 , DviOutEn=0 , InDDC=3 , DDC-Master=0 PreEmphasis=0 [db]}";
/// assert_eq!(decode_status_response(reply.as_bytes()), RoutingTable::from([(0, 2)]));
/// ```
pub fn decode_status_response(bytes: &[u8]) -> RoutingTable {
    let mut table = RoutingTable::new();
    if bytes.is_empty() {
        return table;
    }
    let text = String::from_utf8_lossy(bytes);
    for line in text.split(CR) {
        let line = line.trim_matches('\n');
        if let Some(route) = parse_status_line(line) {
            table.set(route.output, route.input);
        }
    }
    table
}

/// Parses a route command as the device would receive it.
///
/// Returns `None` for anything that is not `<Letter><Digits>\r`.  Used by
/// device simulators and tests.
pub fn decode_route_command(bytes: &[u8]) -> Option<Route> {
    let text = std::str::from_utf8(bytes).ok()?;
    let body = text.strip_suffix(CR)?;
    let mut chars = body.chars();
    let letter = chars.next().filter(char::is_ascii_uppercase)?;
    let digits = chars.as_str();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let input = digits.parse::<usize>().ok()?.checked_sub(1)?;
    Some(Route {
        output: (letter as u8 - b'A') as usize,
        input,
    })
}

/// Renders the status reply the device would send for `table`.
///
/// # Errors
///
/// Returns [`ProtocolError::OutputOutOfRange`] if an output has no letter.
pub fn render_status_response(table: &RoutingTable) -> Result<Vec<u8>, ProtocolError> {
    let mut lines = vec!["m".to_string(), STATUS_HEADER.to_string()];
    for route in table.iter() {
        let letter = output_letter(route.output)?;
        let number = route.input + 1;
        lines.push(format!(
            "{LINE_PREFIX}{letter}: {{DviIn={number} , Hpd=0 , DviOutEn=0 , InDDC={number} , DDC-Master=0 PreEmphasis=0 [db]}}"
        ));
    }
    Ok(lines.join("\r").into_bytes())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn output_letter(output: usize) -> Result<char, ProtocolError> {
    if output >= MAX_OUTPUTS {
        return Err(ProtocolError::OutputOutOfRange {
            output,
            max: MAX_OUTPUTS,
        });
    }
    Ok((b'A' + output as u8) as char)
}

fn parse_status_line(line: &str) -> Option<Route> {
    let rest = line.strip_prefix(LINE_PREFIX)?;

    let letters_end = rest
        .find(|c: char| !c.is_ascii_uppercase())
        .unwrap_or(rest.len());
    let (letters, rest) = rest.split_at(letters_end);
    if letters.is_empty() {
        return None;
    }

    let rest = rest.strip_prefix(INPUT_FIELD)?;
    let digits_end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    let (digits, tail) = rest.split_at(digits_end);
    if digits.is_empty() || !tail.starts_with(" ,") || tail.len() < 3 || !tail.ends_with('}') {
        return None;
    }

    // The line has the status shape from here on; anything that still fails
    // is a malformed field and only this line is dropped.
    if letters.len() != 1 {
        debug!("skipping status line with multi-letter output id '{letters}'");
        return None;
    }
    let output = (letters.as_bytes()[0] - b'A') as usize;
    let input = match digits.parse::<usize>().ok().and_then(|n| n.checked_sub(1)) {
        Some(input) => input,
        None => {
            debug!("skipping status line with invalid input field 'DviIn={digits}'");
            return None;
        }
    };
    Some(Route { output, input })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const MON_A: &str =
        "MonA: {DviIn=3 , Hpd=0 , DviOutEn=0 , InDDC=3 , DDC-Master=0 PreEmphasis=0 [db]}";

    // ── Encoding ──────────────────────────────────────────────────────────────

    #[test]
    fn test_encode_route_uses_letter_and_one_based_input() {
        assert_eq!(encode_route(0, 0).unwrap(), b"A1\r".to_vec());
        assert_eq!(encode_route(7, 7).unwrap(), b"H8\r".to_vec());
    }

    #[test]
    fn test_encode_route_input_has_no_fixed_width() {
        assert_eq!(encode_route(99, 25).unwrap(), b"Z100\r".to_vec());
    }

    #[test]
    fn test_encode_route_rejects_output_beyond_z() {
        assert_eq!(
            encode_route(0, 26),
            Err(ProtocolError::OutputOutOfRange {
                output: 26,
                max: 26
            })
        );
    }

    #[test]
    fn test_encode_status_query_is_m_cr() {
        assert_eq!(encode_status_query(), b"m\r".to_vec());
    }

    // ── Decoding ──────────────────────────────────────────────────────────────

    #[test]
    fn test_decode_reference_reply() {
        // Arrange
        let reply = format!("m\r{STATUS_HEADER}\r{MON_A}");

        // Act
        let table = decode_status_response(reply.as_bytes());

        // Assert – DviIn=3 is one-based, so input index 2
        assert_eq!(table, RoutingTable::from([(0, 2)]));
    }

    #[test]
    fn test_decode_empty_reply_yields_empty_table() {
        assert!(decode_status_response(b"").is_empty());
    }

    #[test]
    fn test_decode_skips_noise_lines() {
        let reply = format!("garbage\r\r{MON_A}\rMonB: nonsense\r\x00\x7f");
        assert_eq!(
            decode_status_response(reply.as_bytes()),
            RoutingTable::from([(0, 2)])
        );
    }

    #[test]
    fn test_decode_skips_multi_letter_output() {
        let reply =
            "MonAB: {DviIn=1 , Hpd=0}\rMonC: {DviIn=2 , Hpd=0 , DviOutEn=0 , InDDC=2 , DDC-Master=0 PreEmphasis=0 [db]}";
        assert_eq!(
            decode_status_response(reply.as_bytes()),
            RoutingTable::from([(2, 1)])
        );
    }

    #[test]
    fn test_decode_skips_zero_input() {
        let reply = "MonA: {DviIn=0 , Hpd=0}\rMonB: {DviIn=5 , Hpd=0}";
        assert_eq!(
            decode_status_response(reply.as_bytes()),
            RoutingTable::from([(1, 4)])
        );
    }

    #[test]
    fn test_decode_skips_overflowing_input() {
        let reply = "MonA: {DviIn=99999999999999999999999 , Hpd=0}";
        assert!(decode_status_response(reply.as_bytes()).is_empty());
    }

    #[test]
    fn test_decode_requires_closing_brace() {
        // A truncated read cuts the last line short.
        let reply = "MonA: {DviIn=1 , Hpd=0}\rMonB: {DviIn=2 , Hpd=";
        assert_eq!(
            decode_status_response(reply.as_bytes()),
            RoutingTable::from([(0, 0)])
        );
    }

    #[test]
    fn test_decode_tolerates_crlf_line_endings() {
        let reply = "m\r\n**** MATRIX STATUS ****\r\nMonD: {DviIn=8 , Hpd=0}\r\n";
        assert_eq!(
            decode_status_response(reply.as_bytes()),
            RoutingTable::from([(3, 7)])
        );
    }

    #[test]
    fn test_decode_later_line_wins_for_duplicate_output() {
        let reply = "MonA: {DviIn=1 , x}\rMonA: {DviIn=4 , x}";
        assert_eq!(
            decode_status_response(reply.as_bytes()),
            RoutingTable::from([(0, 3)])
        );
    }

    #[test]
    fn test_render_then_decode_reproduces_table() {
        let table = RoutingTable::from([(0, 7), (3, 0), (7, 4), (25, 12)]);
        let reply = render_status_response(&table).unwrap();
        assert_eq!(decode_status_response(&reply), table);
    }

    #[test]
    fn test_rendered_reply_starts_with_echo_and_header() {
        let reply = render_status_response(&RoutingTable::from([(0, 2)])).unwrap();
        let text = String::from_utf8(reply).unwrap();
        assert_eq!(text, format!("m\r{STATUS_HEADER}\r{MON_A}"));
    }

    #[test]
    fn test_render_rejects_unaddressable_output() {
        let table = RoutingTable::from([(30, 0)]);
        assert!(render_status_response(&table).is_err());
    }

    // ── Route command parsing ─────────────────────────────────────────────────

    #[test]
    fn test_decode_route_command_inverts_encode() {
        let bytes = encode_route(10, 4).unwrap();
        assert_eq!(decode_route_command(&bytes), Some(Route::new(4, 10)));
    }

    #[test]
    fn test_decode_route_command_rejects_query_and_junk() {
        assert_eq!(decode_route_command(b"m\r"), None);
        assert_eq!(decode_route_command(b"A\r"), None);
        assert_eq!(decode_route_command(b"A0\r"), None);
        assert_eq!(decode_route_command(b"A1"), None);
        assert_eq!(decode_route_command(b"a1\r"), None);
    }
}
