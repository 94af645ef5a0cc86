//! The scanner: UTF-8 source text to arrays of cells.
//!
//! The core consumes the scanner through this narrow surface; the grammar
//! here covers the canonical molded forms so that mold-then-load round
//! trips. Arrays produced carry file/line provenance for error reporting.
//!
//! Paths scanned from source carry words, integers, and blanks as elements;
//! group elements inside paths are supported by the evaluator for
//! programmatically built paths but are not part of this grammar.

use crate::{
    date::Date,
    error::{ErrorId, RunError, RunResult},
    heap::{Heap, HeapData, HeapId},
    intern::Interner,
    series::{Array, Binary},
    strings::Text,
    value::{BinRef, QuotedRef, Seq, SeqKind, Strand, StrandKind, Tuple, Value, WordKind},
};

/// Scans a whole source string into a block array node.
pub fn scan_source(heap: &mut Heap, interner: &mut Interner, src: &str, file: Option<&str>) -> RunResult<HeapId> {
    let mut scanner = Scanner {
        chars: src.chars().collect(),
        pos: 0,
        line: 1,
        file: file.map(|f| interner.intern(f)),
        heap,
        interner,
    };
    let start_line = scanner.line;
    let values = scanner.scan_items(None)?;
    scanner.make_array(values, start_line)
}

struct Scanner<'a> {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    file: Option<crate::intern::SymbolId>,
    heap: &'a mut Heap,
    interner: &'a mut Interner,
}

impl Scanner<'_> {
    fn error(&self, message: impl Into<String>) -> RunError {
        RunError::fail(ErrorId::Syntax, format!("{} (line {})", message.into(), self.line))
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn make_array(&mut self, values: Vec<Value>, line: u32) -> RunResult<HeapId> {
        let mut array = Array::from_values(values);
        array.file_line = self.file.map(|f| (f, line));
        Ok(self.heap.alloc(HeapData::Array(array))?)
    }

    fn skip_blanks(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some(';') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => break,
            }
        }
    }

    /// Scans values until the closing delimiter (or end of input).
    fn scan_items(&mut self, closer: Option<char>) -> RunResult<Vec<Value>> {
        let mut out = Vec::new();
        loop {
            self.skip_blanks();
            match self.peek() {
                None => {
                    if let Some(c) = closer {
                        return Err(self.error(format!("missing closing {c}")));
                    }
                    return Ok(out);
                }
                Some(c) if Some(c) == closer => {
                    self.bump();
                    return Ok(out);
                }
                Some(']') | Some(')') => {
                    return Err(self.error("unexpected closing delimiter"));
                }
                _ => out.push(self.scan_value()?),
            }
        }
    }

    fn scan_value(&mut self) -> RunResult<Value> {
        let c = self.peek().expect("caller ensured input remains");
        match c {
            '[' => {
                self.bump();
                let line = self.line;
                let values = self.scan_items(Some(']'))?;
                let id = self.make_array(values, line)?;
                Ok(Value::Seq(Seq::new(SeqKind::Block, id)))
            }
            '(' => {
                self.bump();
                let line = self.line;
                let values = self.scan_items(Some(')'))?;
                let id = self.make_array(values, line)?;
                Ok(Value::Seq(Seq::new(SeqKind::Group, id)))
            }
            '"' => self.scan_quoted_string(),
            '{' => self.scan_braced_string(),
            '#' => self.scan_hash(),
            '%' => {
                self.bump();
                let token = self.take_token_chars();
                self.make_strand(StrandKind::File, &token)
            }
            '\'' => {
                let mut depth: u8 = 0;
                while self.peek() == Some('\'') {
                    self.bump();
                    depth += 1;
                }
                self.skip_blanks();
                if self.peek().is_none() {
                    return Err(self.error("quote with nothing to quote"));
                }
                let inner = self.scan_value()?;
                let cell = self.heap.alloc(HeapData::QuotedCell(inner))?;
                Ok(Value::Quoted(QuotedRef { depth, cell }))
            }
            '@' => {
                self.bump();
                let inner = self.scan_value()?;
                symify(inner).map_err(|kind| self.error(format!("@ cannot prefix a {kind}")))
            }
            ':' => {
                self.bump();
                let inner = self.scan_value()?;
                getify(inner).map_err(|kind| self.error(format!(": cannot prefix a {kind}")))
            }
            '<' if matches!(self.peek_at(1), Some(c) if c.is_alphanumeric() || c == '/' || c == '!') => {
                self.scan_tag()
            }
            _ => self.scan_token(),
        }
    }

    // --- strings ----------------------------------------------------------

    fn scan_quoted_string(&mut self) -> RunResult<Value> {
        self.bump(); // opening quote
        let mut content = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some('"') => break,
                Some('\n') => return Err(self.error("newline inside quoted string")),
                Some('^') => content.push(self.scan_escape()?),
                Some(c) => content.push(c),
            }
        }
        self.make_strand(StrandKind::Text, &content)
    }

    fn scan_braced_string(&mut self) -> RunResult<Value> {
        self.bump(); // opening brace
        let mut content = String::new();
        let mut depth = 1usize;
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated braced string")),
                Some('{') => {
                    depth += 1;
                    content.push('{');
                }
                Some('}') => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                    content.push('}');
                }
                Some('^') => content.push(self.scan_escape()?),
                Some(c) => content.push(c),
            }
        }
        self.make_strand(StrandKind::Text, &content)
    }

    fn scan_escape(&mut self) -> RunResult<char> {
        match self.bump() {
            None => Err(self.error("dangling escape")),
            Some('/') => Ok('\n'),
            Some('-') => Ok('\t'),
            Some('^') => Ok('^'),
            Some('"') => Ok('"'),
            Some('{') => Ok('{'),
            Some('}') => Ok('}'),
            Some('@') => Ok('\0'),
            Some('(') => {
                let mut hex = String::new();
                loop {
                    match self.bump() {
                        None => return Err(self.error("unterminated ^( escape")),
                        Some(')') => break,
                        Some(c) => hex.push(c),
                    }
                }
                let code = u32::from_str_radix(hex.trim(), 16).map_err(|_| self.error("bad hex in ^( escape"))?;
                char::from_u32(code).ok_or_else(|| self.error("^( escape is not a codepoint"))
            }
            Some(c) => Ok(c),
        }
    }

    fn make_strand(&mut self, kind: StrandKind, content: &str) -> RunResult<Value> {
        let id = self.heap.alloc(HeapData::Text(Text::from_str(content)))?;
        Ok(Value::Strand(Strand {
            kind,
            series: id,
            index: 0,
        }))
    }

    // --- hash forms -------------------------------------------------------

    fn scan_hash(&mut self) -> RunResult<Value> {
        self.bump(); // '#'
        match self.peek() {
            Some('"') => {
                self.bump();
                let c = match self.bump() {
                    None => return Err(self.error("unterminated char literal")),
                    Some('^') => self.scan_escape()?,
                    Some(c) => c,
                };
                if self.bump() != Some('"') {
                    return Err(self.error("char literal must hold one character"));
                }
                Ok(Value::Char(c))
            }
            Some('{') => {
                self.bump();
                let mut hex = String::new();
                loop {
                    match self.bump() {
                        None => return Err(self.error("unterminated binary literal")),
                        Some('}') => break,
                        Some(c) if c.is_whitespace() => {}
                        Some(c) if c.is_ascii_hexdigit() => hex.push(c),
                        Some(c) => return Err(self.error(format!("{c} is not a hex digit"))),
                    }
                }
                if hex.len() % 2 != 0 {
                    return Err(self.error("binary literal needs an even digit count"));
                }
                let bytes: Vec<u8> = hex
                    .as_bytes()
                    .chunks_exact(2)
                    .map(|pair| {
                        let s: String = pair.iter().map(|&b| b as char).collect();
                        u8::from_str_radix(&s, 16).expect("digits validated")
                    })
                    .collect();
                let id = self.heap.alloc(HeapData::Binary(Binary::from_bytes(bytes)))?;
                Ok(Value::Binary(BinRef { series: id, index: 0 }))
            }
            Some('[') => {
                self.bump();
                let values = self.scan_items(Some(']'))?;
                match values.as_slice() {
                    [Value::Word(w)] => {
                        let spelling = self.interner.spelling(w.symbol);
                        match spelling {
                            "true" => Ok(Value::Logic(true)),
                            "false" => Ok(Value::Logic(false)),
                            other => Err(self.error(format!("unknown construction #[{other}]"))),
                        }
                    }
                    _ => Err(self.error("unsupported construction syntax")),
                }
            }
            _ => {
                let token = self.take_token_chars();
                if token.is_empty() {
                    return Err(self.error("lone #"));
                }
                self.make_strand(StrandKind::Issue, &token)
            }
        }
    }

    fn scan_tag(&mut self) -> RunResult<Value> {
        self.bump(); // '<'
        let mut content = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated tag")),
                Some('>') => break,
                Some(c) => content.push(c),
            }
        }
        self.make_strand(StrandKind::Tag, &content)
    }

    // --- word-ish tokens --------------------------------------------------

    /// Consumes a raw token: everything up to whitespace or a structural
    /// delimiter. Paths keep their slashes; classification happens after.
    fn take_token_chars(&mut self) -> String {
        let mut token = String::new();
        while let Some(c) = self.peek() {
            if c.is_whitespace() || matches!(c, '[' | ']' | '(' | ')' | '{' | '}' | '"' | ';') {
                break;
            }
            token.push(c);
            self.bump();
        }
        token
    }

    fn scan_token(&mut self) -> RunResult<Value> {
        let token = self.take_token_chars();
        if token.is_empty() {
            return Err(self.error("unexpected character"));
        }
        self.classify_token(&token)
    }

    fn classify_token(&mut self, token: &str) -> RunResult<Value> {
        // Set form: trailing colon on a word or path.
        let (body, set_form) = match token.strip_suffix(':') {
            Some(stripped) if !stripped.is_empty() && !stripped.contains(':') => (stripped, true),
            _ => (token, false),
        };

        if body == "_" && !set_form {
            return Ok(Value::Blank);
        }

        // Dates may contain '/': try before path splitting.
        if !set_form
            && let Some(date) = parse_date_token(body)
        {
            return Ok(Value::Date(date));
        }

        // Urls carry slashes; they must not split as paths.
        if body.contains("://") {
            return self.make_strand(StrandKind::Url, body);
        }

        if body.contains('/') && body != "/" && !body.starts_with("//") {
            return self.classify_path(body, set_form);
        }

        if set_form {
            let sym = self.interner.intern(body);
            return Ok(Value::word(WordKind::Set, sym));
        }

        if let Some(value) = parse_scalar_token(body) {
            return Ok(value);
        }
        if body.len() > 2
            && let Some(at) = body.find('@')
            && at > 0
            && at < body.len() - 1
        {
            return self.make_strand(StrandKind::Email, body);
        }

        let sym = self.interner.intern(body);
        Ok(Value::word(WordKind::Plain, sym))
    }

    fn classify_path(&mut self, body: &str, set_form: bool) -> RunResult<Value> {
        let mut elems: Vec<Value> = Vec::new();
        for (i, segment) in body.split('/').enumerate() {
            if segment.is_empty() {
                if i == 0 {
                    elems.push(Value::Blank); // refinement form: /word
                    continue;
                }
                return Err(self.error("empty path segment"));
            }
            if let Some(value) = parse_scalar_token(segment) {
                elems.push(value);
            } else {
                let sym = self.interner.intern(segment);
                elems.push(Value::word(WordKind::Plain, sym));
            }
        }
        if elems.len() < 2 {
            return Err(self.error("path needs at least two elements"));
        }
        let line = self.line;
        let id = self.make_array(elems, line)?;
        let kind = if set_form { SeqKind::SetPath } else { SeqKind::Path };
        Ok(Value::Seq(Seq::new(kind, id)))
    }
}

/// Converts a scanned value to its sym (@-prefixed) form.
fn symify(value: Value) -> Result<Value, crate::value::Kind> {
    match value {
        Value::Word(mut w) if w.kind == WordKind::Plain => {
            w.kind = WordKind::Sym;
            Ok(Value::Word(w))
        }
        Value::Seq(mut s) => {
            s.kind = match s.kind {
                SeqKind::Block => SeqKind::SymBlock,
                SeqKind::Group => SeqKind::SymGroup,
                SeqKind::Path => SeqKind::SymPath,
                other => return Err(other.cell_kind()),
            };
            Ok(Value::Seq(s))
        }
        other => Err(other.kind()),
    }
}

/// Converts a scanned value to its get (:-prefixed) form.
fn getify(value: Value) -> Result<Value, crate::value::Kind> {
    match value {
        Value::Word(mut w) if w.kind == WordKind::Plain => {
            w.kind = WordKind::Get;
            Ok(Value::Word(w))
        }
        Value::Seq(mut s) => {
            s.kind = match s.kind {
                SeqKind::Block => SeqKind::GetBlock,
                SeqKind::Group => SeqKind::GetGroup,
                SeqKind::Path => SeqKind::GetPath,
                other => return Err(other.cell_kind()),
            };
            Ok(Value::Seq(s))
        }
        other => Err(other.kind()),
    }
}

// --- scalar token parsing (free of scanner state) --------------------------

/// Tries integer, decimal, time, pair, and tuple readings of a bare token.
#[must_use]
fn parse_scalar_token(token: &str) -> Option<Value> {
    let first = token.chars().next()?;
    let signed_digit = (first == '+' || first == '-') && token.chars().nth(1).is_some_and(|c| c.is_ascii_digit());
    if !first.is_ascii_digit() && !signed_digit && first != '.' {
        return None;
    }

    if token.contains(':') {
        return parse_time_token(token).map(Value::Time);
    }
    if let Some(x_at) = token.find('x')
        && x_at > 0
    {
        let (left, right) = (&token[..x_at], &token[x_at + 1..]);
        if let (Ok(a), Ok(b)) = (left.parse::<f64>(), right.parse::<f64>()) {
            return Some(Value::Pair(a, b));
        }
        return None;
    }
    // Tuples: three or more dot-separated byte-sized integers.
    let dot_parts: Vec<&str> = token.split('.').collect();
    if dot_parts.len() >= 3 && dot_parts.iter().all(|p| p.parse::<u8>().is_ok()) {
        let parts: Vec<u8> = dot_parts.iter().map(|p| p.parse().expect("checked")).collect();
        return Some(Value::Tuple(Tuple::from_parts(&parts)));
    }
    if let Ok(n) = token.parse::<i64>() {
        return Some(Value::Integer(n));
    }
    if (token.contains('.') || token.contains('e') || token.contains('E'))
        && let Ok(d) = token.parse::<f64>()
    {
        return Some(Value::Decimal(d));
    }
    None
}

/// `h:mm`, `h:mm:ss`, `h:mm:ss.frac`, with optional leading sign.
#[must_use]
fn parse_time_token(token: &str) -> Option<i64> {
    let (negative, body) = match token.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, token.strip_prefix('+').unwrap_or(token)),
    };
    let parts: Vec<&str> = body.split(':').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return None;
    }
    let hours: i64 = parts[0].parse().ok()?;
    let minutes: i64 = parts[1].parse().ok()?;
    let mut nanos = (hours * 3600 + minutes * 60) * 1_000_000_000;
    if parts.len() == 3 {
        let sec_part = parts[2];
        let (secs, frac_nanos) = match sec_part.find('.') {
            Some(dot) => {
                let secs: i64 = sec_part[..dot].parse().ok()?;
                let frac = &sec_part[dot + 1..];
                if frac.is_empty() || frac.len() > 9 || !frac.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                let scale = 10i64.pow(9 - frac.len() as u32);
                (secs, frac.parse::<i64>().ok()? * scale)
            }
            None => (sec_part.parse().ok()?, 0),
        };
        nanos += secs * 1_000_000_000 + frac_nanos;
    }
    Some(if negative { -nanos } else { nanos })
}

/// `1-Jan-2000`, `1-1-2000`, `2000-01-02`, optionally `/h:mm:ss` time.
#[must_use]
fn parse_date_token(token: &str) -> Option<Date> {
    let (date_part, time_part) = match token.find('/') {
        Some(slash) => (&token[..slash], Some(&token[slash + 1..])),
        None => (token, None),
    };
    let parts: Vec<&str> = date_part.split('-').collect();
    if parts.len() != 3 {
        return None;
    }
    let (year, month, day) = if parts[0].len() == 4 {
        // ISO ordering: yyyy-mm-dd.
        (
            parts[0].parse::<i32>().ok()?,
            parts[1].parse::<i32>().ok()?,
            parts[2].parse::<i32>().ok()?,
        )
    } else {
        // Day-month-year, month numeric or named.
        let day = parts[0].parse::<i32>().ok()?;
        let month = parse_month(parts[1])?;
        let year = parts[2].parse::<i32>().ok()?;
        (year, month, day)
    };
    if !(1..=12).contains(&month) || !(1..=31 + 3).contains(&day) {
        return None;
    }
    let mut date = Date::new_normalized(year, month, day);
    if let Some(t) = time_part {
        let nanos = parse_time_token(t)?;
        date = date.with_time(nanos, None);
    }
    Some(date)
}

fn parse_month(text: &str) -> Option<i32> {
    if let Ok(n) = text.parse::<i32>() {
        return Some(n);
    }
    if text.len() < 3 {
        return None;
    }
    let lower = text.to_ascii_lowercase();
    const NAMES: [&str; 12] = [
        "january",
        "february",
        "march",
        "april",
        "may",
        "june",
        "july",
        "august",
        "september",
        "october",
        "november",
        "december",
    ];
    NAMES
        .iter()
        .position(|name| name.starts_with(&lower))
        .map(|pos| pos as i32 + 1)
}
