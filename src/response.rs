//! SMTP reply parsing
//!
//! An SMTP reply is one or more lines matching `^\d{3}[ -].*$`: lines with `-`
//! after the code are continuations, a line with a space is the terminator.
//! [RFC 5321, section 4.2](https://tools.ietf.org/html/rfc5321#section-4.2)

use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{digit1, line_ending, not_line_ending},
    combinator::{map_res, opt},
    sequence::tuple,
    IResult,
};
use std::fmt::{self, Display, Formatter};

/// First digit of the reply code: the overall kind of reply.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum Severity {
    /// 2yz
    PositiveCompletion = 2,
    /// 3yz
    PositiveIntermediate = 3,
    /// 4yz
    TransientNegativeCompletion = 4,
    /// 5yz
    PermanentNegativeCompletion = 5,
}

impl Severity {
    fn from_digit(d: u8) -> Result<Severity, &'static str> {
        match d {
            2 => Ok(Severity::PositiveCompletion),
            3 => Ok(Severity::PositiveIntermediate),
            4 => Ok(Severity::TransientNegativeCompletion),
            5 => Ok(Severity::PermanentNegativeCompletion),
            _ => Err("invalid reply code severity digit"),
        }
    }
}

/// Second digit of the reply code: the category of the reply.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum Category {
    /// x0z: syntax errors
    Syntax = 0,
    /// x1z: informational replies
    Information = 1,
    /// x2z: connections replies
    Connections = 2,
    /// x3z: unspecified
    Unspecified3 = 3,
    /// x4z: unspecified
    Unspecified4 = 4,
    /// x5z: mail system replies
    MailSystem = 5,
}

impl Category {
    fn from_digit(d: u8) -> Result<Category, &'static str> {
        match d {
            0 => Ok(Category::Syntax),
            1 => Ok(Category::Information),
            2 => Ok(Category::Connections),
            3 => Ok(Category::Unspecified3),
            4 => Ok(Category::Unspecified4),
            5 => Ok(Category::MailSystem),
            _ => Err("invalid reply code category digit"),
        }
    }
}

/// Third digit of the reply code, as an opaque 0-9 value.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
#[allow(missing_docs)]
pub enum Detail {
    Zero = 0,
    One = 1,
    Two = 2,
    Three = 3,
    Four = 4,
    Five = 5,
    Six = 6,
    Seven = 7,
    Eight = 8,
    Nine = 9,
}

impl Detail {
    fn from_digit(d: u8) -> Result<Detail, &'static str> {
        Ok(match d {
            0 => Detail::Zero,
            1 => Detail::One,
            2 => Detail::Two,
            3 => Detail::Three,
            4 => Detail::Four,
            5 => Detail::Five,
            6 => Detail::Six,
            7 => Detail::Seven,
            8 => Detail::Eight,
            9 => Detail::Nine,
            _ => return Err("invalid reply code detail digit"),
        })
    }
}

/// A three-digit SMTP reply code, decomposed per RFC 5321 section 4.2.1.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct Code {
    /// First digit
    pub severity: Severity,
    /// Second digit
    pub category: Category,
    /// Third digit
    pub detail: Detail,
}

impl Code {
    /// Builds a code out of its three digits.
    pub fn new(severity: Severity, category: Category, detail: Detail) -> Code {
        Code {
            severity,
            category,
            detail,
        }
    }

    /// Parses a code out of its three-digit numeric value (100..=599).
    pub fn from_u16(value: u16) -> Result<Code, &'static str> {
        if !(100..=599).contains(&value) {
            return Err("reply code out of range");
        }
        let severity = Severity::from_digit((value / 100) as u8)?;
        let category = Category::from_digit((value / 10 % 10) as u8)?;
        let detail = Detail::from_digit((value % 10) as u8)?;
        Ok(Code::new(severity, category, detail))
    }

    /// Returns the three-digit numeric value of this code.
    pub fn value(&self) -> u16 {
        self.severity as u16 * 100 + self.category as u16 * 10 + self.detail as u16
    }
}

impl Display for Code {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{:03}", self.value())
    }
}

/// An SMTP server reply: a code plus one line of text per continuation.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Response {
    /// The three-digit reply code.
    pub code: Code,
    /// Text of each line of the reply, without the code or separator.
    pub message: Vec<String>,
}

impl Display for Response {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        if self.message.is_empty() {
            return write!(f, "{}", self.code);
        }
        let mut lines = self.message.iter();
        if let Some(last) = lines.next_back() {
            for line in self.message[..self.message.len() - 1].iter() {
                write!(f, "{}-{}\r\n", self.code, line)?;
            }
            write!(f, "{} {}", self.code, last)?;
        }
        Ok(())
    }
}

impl Response {
    /// Creates a new response out of a code and its message lines.
    pub fn new(code: Code, message: Vec<String>) -> Response {
        Response { code, message }
    }

    /// `true` for 2xx and 3xx codes.
    pub fn is_positive(&self) -> bool {
        matches!(
            self.code.severity,
            Severity::PositiveCompletion | Severity::PositiveIntermediate
        )
    }

    /// `true` if the numeric value of the code equals `code`.
    pub fn has_code(&self, code: u16) -> bool {
        self.code.value() == code
    }

    /// First word of the first message line, if any.
    pub fn first_word(&self) -> Option<&str> {
        self.message.first().and_then(|line| line.split(' ').next())
    }

    /// First message line, if any.
    pub fn first_line(&self) -> Option<&str> {
        self.message.first().map(String::as_str)
    }
}

/// One raw reply line: its code, whether it continues, and its text.
struct ResponseLine {
    code: u16,
    continues: bool,
    text: String,
}

fn reply_code(input: &str) -> IResult<&str, u16> {
    map_res(digit1, |s: &str| s.parse::<u16>())(input)
}

fn response_line(input: &str) -> IResult<&str, ResponseLine> {
    let (input, (code, sep, text, _)) = tuple((
        reply_code,
        alt((tag("-"), tag(" "))),
        not_line_ending,
        opt(line_ending),
    ))(input)?;
    Ok((
        input,
        ResponseLine {
            code,
            continues: sep == "-",
            text: text.to_string(),
        },
    ))
}

/// Parses a single reply line (`NNN-text` or `NNN text`).
///
/// Returns the parsed line's numeric code, whether it is a continuation, and its text.
pub(crate) fn parse_response_line(
    line: &str,
) -> Result<(u16, bool, String), crate::error::Error> {
    match response_line(line) {
        Ok((_remaining, parsed)) => Ok((parsed.code, parsed.continues, parsed.text)),
        Err(_) => Err(crate::error::Error::MalformedResponse(line.to_string())),
    }
}

/// Accumulates reply lines (as produced by the line framer) into a single [`Response`],
/// enforcing that every line of a multi-line reply carries the same code.
#[derive(Default)]
pub(crate) struct ResponseAccumulator {
    code: Option<u16>,
    lines: Vec<String>,
}

impl ResponseAccumulator {
    /// Feeds one raw line (without its trailing CRLF) into the accumulator.
    ///
    /// Returns `Some(Response)` once the terminator line has been seen.
    pub fn push(&mut self, line: &str) -> Result<Option<Response>, crate::error::Error> {
        let (code, continues, text) = parse_response_line(line)?;
        match self.code {
            None => self.code = Some(code),
            Some(expected) if expected != code => {
                return Err(crate::error::Error::MalformedResponse(format!(
                    "reply code changed from {} to {} mid-response",
                    expected, code
                )))
            }
            Some(_) => {}
        }
        self.lines.push(text);
        if continues {
            Ok(None)
        } else {
            let code = Code::from_u16(self.code.take().expect("code set above"))
                .map_err(|e| crate::error::Error::MalformedResponse(e.to_string()))?;
            Ok(Some(Response::new(code, std::mem::take(&mut self.lines))))
        }
    }
}
