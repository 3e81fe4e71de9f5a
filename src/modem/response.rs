//! # Response Classification
//!
//! Maps trimmed modem lines to protocol tokens by substring matching.
//!
//! | Token | Matches |
//! |-------|---------|
//! | [`Token::GotIp`] | `WIFI GOT IP` |
//! | [`Token::Ok`] | line is exactly `OK` |
//! | [`Token::WifiDisconnect`] | `WIFI DISCONNECT` |
//! | [`Token::ConnectAck`] | `CONNECT`, but not WiFi status lines |
//! | [`Token::AlreadyConnected`] | `ALREADY CONNECTED` |
//! | [`Token::Prompt`] | line ends with `>` |
//! | [`Token::SendOk`] | `SEND OK` |
//! | [`Token::SendFail`] | `SEND FAIL` |
//! | [`Token::Closed`] | `CLOSED` |
//! | [`Token::Error`] | `ERROR` |
//! | [`Token::DnsFail`] | `DNS FAIL` |
//! | [`Token::JoinFail`] | line is exactly `FAIL` |
//!
//! One line may carry several tokens; they are reported in table order.

/// Trailing marker of the CIPSEND data prompt
pub const PROMPT_MARKER: char = '>';

/// A recognised fragment of a modem response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    GotIp,
    Ok,
    WifiDisconnect,
    ConnectAck,
    AlreadyConnected,
    Prompt,
    SendOk,
    SendFail,
    Closed,
    Error,
    DnsFail,
    JoinFail,
}

/// Every token present on a trimmed line, in vocabulary order
///
/// Unrecognised lines yield an empty list.
pub fn classify(line: &str) -> Vec<Token> {
    let mut tokens = Vec::new();

    if line.contains("WIFI GOT IP") {
        tokens.push(Token::GotIp);
    }
    if line == "OK" {
        tokens.push(Token::Ok);
    }
    if line.contains("WIFI DISCONNECT") {
        tokens.push(Token::WifiDisconnect);
    }
    if line.contains("ALREADY CONNECTED") {
        tokens.push(Token::AlreadyConnected);
    } else if line.contains("CONNECT") && !line.contains("WIFI") {
        tokens.push(Token::ConnectAck);
    }
    if line.ends_with(PROMPT_MARKER) {
        tokens.push(Token::Prompt);
    }
    if line.contains("SEND OK") {
        tokens.push(Token::SendOk);
    }
    if line.contains("SEND FAIL") {
        tokens.push(Token::SendFail);
    }
    if line.contains("CLOSED") {
        tokens.push(Token::Closed);
    }
    if line.contains("ERROR") {
        tokens.push(Token::Error);
    }
    if line.contains("DNS FAIL") {
        tokens.push(Token::DnsFail);
    }
    if line == "FAIL" {
        tokens.push(Token::JoinFail);
    }

    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_tokens() {
        assert_eq!(classify("WIFI GOT IP"), vec![Token::GotIp]);
        assert_eq!(classify("OK"), vec![Token::Ok]);
        assert_eq!(classify("ERROR"), vec![Token::Error]);
        assert_eq!(classify("DNS Fail"), vec![]);
        assert_eq!(classify("DNS FAIL"), vec![Token::DnsFail]);
        assert_eq!(classify("FAIL"), vec![Token::JoinFail]);
        assert_eq!(classify("CONNECT"), vec![Token::ConnectAck]);
        assert_eq!(classify(">"), vec![Token::Prompt]);
        assert_eq!(classify("SEND OK"), vec![Token::SendOk]);
        assert_eq!(classify("SEND FAIL"), vec![Token::SendFail]);
        assert_eq!(classify("CLOSED"), vec![Token::Closed]);
    }

    #[test]
    fn test_connect_variants() {
        assert_eq!(classify("ALREADY CONNECTED"), vec![Token::AlreadyConnected]);
        assert_eq!(classify("0,CONNECT"), vec![Token::ConnectAck]);
        assert_eq!(classify("WIFI CONNECTED"), vec![]);
        assert_eq!(classify("WIFI DISCONNECT"), vec![Token::WifiDisconnect]);
    }

    #[test]
    fn test_ok_must_be_whole_line() {
        assert!(!classify("SEND OK").contains(&Token::Ok));
        assert!(!classify("+CIPSTATUS:OK?").contains(&Token::Ok));
    }

    #[test]
    fn test_send_fail_is_not_join_fail() {
        assert_eq!(classify("SEND FAIL"), vec![Token::SendFail]);
    }

    #[test]
    fn test_compound_line_reports_every_token() {
        assert_eq!(
            classify("SEND OK CLOSED"),
            vec![Token::SendOk, Token::Closed]
        );
        assert_eq!(
            classify("ALREADY CONNECTED ERROR"),
            vec![Token::AlreadyConnected, Token::Error]
        );
    }

    #[test]
    fn test_unrecognised_lines() {
        assert!(classify("AT+CWMODE=1").is_empty());
        assert!(classify("busy p...").is_empty());
        assert!(classify("+IPD,4:1234").is_empty());
    }
}
