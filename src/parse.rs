//! Parser for build files.
//!
//! To avoid allocations parsing frequently uses references into the input
//! text, marked with the lifetime `'text`.

use crate::{
    eval::{EvalPart, EvalString, Vars},
    scanner::{ParseError, ParseResult, Scanner},
    smallmap::SmallMap,
};
use std::path::Path;

/// A list of variable bindings, as expressed with syntax like:
///   key = $val
pub type VarList<'text> = SmallMap<&'text str, EvalString<&'text str>>;

pub struct Rule<'text> {
    pub name: &'text str,
    pub vars: VarList<'text>,
}

pub struct Build<'text> {
    pub rule: &'text str,
    pub line: usize,
    pub outs: Vec<EvalString<&'text str>>,
    pub explicit_outs: usize,
    pub ins: Vec<EvalString<&'text str>>,
    pub explicit_ins: usize,
    pub implicit_ins: usize,
    pub vars: VarList<'text>,
}

pub enum Statement<'text> {
    Rule(Rule<'text>),
    Build(Build<'text>),
    Default(Vec<EvalString<&'text str>>),
}

pub struct Parser<'text> {
    scanner: Scanner<'text>,
    /// Top-level variable bindings, evaluated as they are read.
    pub vars: Vars<'text>,
    /// Reading EvalStrings is very hot when parsing, so we always read into
    /// this buffer and then clone it afterwards.
    eval_buf: Vec<EvalPart<&'text str>>,
}

impl<'text> Parser<'text> {
    pub fn new(buf: &'text [u8]) -> Parser<'text> {
        Parser {
            scanner: Scanner::new(buf),
            vars: Vars::default(),
            eval_buf: Vec::with_capacity(16),
        }
    }

    pub fn format_parse_error(&self, filename: &Path, err: ParseError) -> String {
        self.scanner.format_parse_error(filename, err)
    }

    pub fn read(&mut self) -> ParseResult<Option<Statement<'text>>> {
        loop {
            match self.scanner.peek() {
                '\0' => return Ok(None),
                '\n' | '\r' => self.scanner.next(),
                '#' => self.skip_comment()?,
                ' ' | '\t' => return self.scanner.parse_error("unexpected whitespace"),
                _ => {
                    let ident = self.read_ident()?;
                    self.scanner.skip_spaces();
                    match ident {
                        "rule" => return Ok(Some(Statement::Rule(self.read_rule()?))),
                        "build" => return Ok(Some(Statement::Build(self.read_build()?))),
                        "default" => return Ok(Some(Statement::Default(self.read_default()?))),
                        ident => {
                            let val = self.read_vardef()?.evaluate(&[&self.vars]);
                            self.vars.insert(ident, val);
                        }
                    }
                }
            }
        }
    }

    /// Read the `= ...` part of a variable definition, through the end of
    /// the line.
    fn read_vardef(&mut self) -> ParseResult<EvalString<&'text str>> {
        self.scanner.skip_spaces();
        self.scanner.expect('=')?;
        self.scanner.skip_spaces();
        let val = self.read_eval(false)?;
        self.expect_newline()?;
        Ok(val)
    }

    /// Read a collection of indented `var = value` lines.
    fn read_scoped_vars(&mut self) -> ParseResult<VarList<'text>> {
        let mut vars = VarList::default();
        while self.scanner.peek() == ' ' {
            self.scanner.skip_spaces();
            let name = self.read_ident()?;
            self.scanner.skip_spaces();
            let val = self.read_vardef()?;
            vars.insert(name, val);
        }
        Ok(vars)
    }

    fn read_rule(&mut self) -> ParseResult<Rule<'text>> {
        let name = self.read_ident()?;
        self.expect_newline()?;
        let vars = self.read_scoped_vars()?;
        Ok(Rule { name, vars })
    }

    fn read_build(&mut self) -> ParseResult<Build<'text>> {
        let line = self.scanner.line;

        let mut outs = Vec::new();
        while let Some(path) = self.read_path()? {
            outs.push(path);
        }
        let explicit_outs = outs.len();
        if self.scanner.skip('|') {
            while let Some(path) = self.read_path()? {
                outs.push(path);
            }
        }
        if outs.is_empty() {
            return self.scanner.parse_error("expected output path");
        }

        self.scanner.expect(':')?;
        self.scanner.skip_spaces();
        let rule = self.read_ident()?;

        let mut ins = Vec::new();
        while let Some(path) = self.read_path()? {
            ins.push(path);
        }
        let explicit_ins = ins.len();

        let mut order_only = false;
        if self.scanner.skip('|') {
            if self.scanner.skip('|') {
                order_only = true;
            } else {
                while let Some(path) = self.read_path()? {
                    ins.push(path);
                }
                if self.scanner.skip('|') {
                    self.scanner.expect('|')?;
                    order_only = true;
                }
            }
        }
        let implicit_ins = ins.len() - explicit_ins;
        if order_only {
            while let Some(path) = self.read_path()? {
                ins.push(path);
            }
        }

        self.expect_newline()?;
        let vars = self.read_scoped_vars()?;
        Ok(Build {
            rule,
            line,
            outs,
            explicit_outs,
            ins,
            explicit_ins,
            implicit_ins,
            vars,
        })
    }

    fn read_default(&mut self) -> ParseResult<Vec<EvalString<&'text str>>> {
        let mut defaults = Vec::new();
        while let Some(path) = self.read_path()? {
            defaults.push(path);
        }
        if defaults.is_empty() {
            return self.scanner.parse_error("expected path");
        }
        self.expect_newline()?;
        Ok(defaults)
    }

    fn skip_comment(&mut self) -> ParseResult<()> {
        loop {
            match self.scanner.read() {
                '\0' => {
                    self.scanner.back();
                    return Ok(());
                }
                '\n' => return Ok(()),
                _ => {}
            }
        }
    }

    fn read_ident(&mut self) -> ParseResult<&'text str> {
        let start = self.scanner.ofs;
        while matches!(self.scanner.peek(), 'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '-' | '.') {
            self.scanner.next();
        }
        let end = self.scanner.ofs;
        if end == start {
            return self.scanner.parse_error("expected identifier");
        }
        Ok(self.scanner.slice(start, end))
    }

    fn expect_newline(&mut self) -> ParseResult<()> {
        self.scanner.skip('\r');
        if self.scanner.peek() == '\0' {
            return Ok(());
        }
        self.scanner.expect('\n')
    }

    /// Read one path component of a build statement, stopping at the
    /// delimiters that structure it.  Empty means the list is over.
    fn read_path(&mut self) -> ParseResult<Option<EvalString<&'text str>>> {
        self.scanner.skip_spaces();
        let path = self.read_eval(true)?;
        if path.is_empty() {
            return Ok(None);
        }
        Ok(Some(path))
    }

    /// Read an EvalString, handling all the $-escapes.  When reading a path,
    /// spaces, colons, and pipes end the string; values run to end of line.
    fn read_eval(&mut self, path: bool) -> ParseResult<EvalString<&'text str>> {
        self.eval_buf.clear();
        let mut literal_start = self.scanner.ofs;
        loop {
            match self.scanner.peek() {
                '\0' | '\n' | '\r' => break,
                ' ' | ':' | '|' if path => break,
                '$' => {
                    if self.scanner.ofs > literal_start {
                        self.eval_buf.push(EvalPart::Literal(
                            self.scanner.slice(literal_start, self.scanner.ofs),
                        ));
                    }
                    self.scanner.next();
                    self.read_escape()?;
                    literal_start = self.scanner.ofs;
                }
                _ => self.scanner.next(),
            }
        }
        if self.scanner.ofs > literal_start {
            self.eval_buf.push(EvalPart::Literal(
                self.scanner.slice(literal_start, self.scanner.ofs),
            ));
        }
        Ok(EvalString::new(self.eval_buf.clone()))
    }

    /// Read the text following a '$', pushing the resulting token.
    fn read_escape(&mut self) -> ParseResult<()> {
        match self.scanner.peek() {
            '$' | ' ' | ':' => {
                let ofs = self.scanner.ofs;
                self.scanner.next();
                self.eval_buf
                    .push(EvalPart::Literal(self.scanner.slice(ofs, ofs + 1)));
            }
            '\r' | '\n' => {
                // Line continuation: swallow the newline and the indent.
                self.scanner.skip('\r');
                self.scanner.expect('\n')?;
                self.scanner.skip_spaces();
            }
            '{' => {
                self.scanner.next();
                let start = self.scanner.ofs;
                while matches!(self.scanner.peek(), 'a'..='z' | 'A'..='Z' | '0'..='9' | '_') {
                    self.scanner.next();
                }
                let end = self.scanner.ofs;
                if end == start {
                    return self.scanner.parse_error("expected variable name");
                }
                if !self.scanner.skip('}') {
                    return self.scanner.parse_error("expected '}'");
                }
                self.eval_buf
                    .push(EvalPart::VarRef(self.scanner.slice(start, end)));
            }
            _ => {
                let start = self.scanner.ofs;
                while matches!(self.scanner.peek(), 'a'..='z' | 'A'..='Z' | '0'..='9' | '_') {
                    self.scanner.next();
                }
                let end = self.scanner.ofs;
                if end == start {
                    return self.scanner.parse_error("expected variable after '$'");
                }
                self.eval_buf
                    .push(EvalPart::VarRef(self.scanner.slice(start, end)));
            }
        }
        Ok(())
    }
}
