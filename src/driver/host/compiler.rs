//! Front end of the host driver's program builder.
//!
//! The host driver does not generate code. Building a program means scanning
//! the source for `__kernel` entry points, extracting their parameter lists,
//! and binding every entry point to a registered [`NativeKernel`] whose
//! declared argument kinds agree with the source. Everything that would stop
//! a real compiler from producing those entry points (unbalanced brackets,
//! unterminated comments, non-void kernels, unqualified pointers, unknown
//! types, `double` on a device without fp64) is reported as a diagnostic in
//! the build log.
//!
//! [`NativeKernel`]: super::library::NativeKernel

use super::library::NativeLibrary;
use crate::driver::{ArgKind, ArgSignature, DeviceInfo, KernelSignature};
use std::fmt;
use std::iter::Peekable;
use std::str::CharIndices;

const FP64_EXTENSION: &str = "cl_khr_fp64";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Diagnostic {
    pub line: usize,
    pub col: usize,
    pub message: String,
}

impl Diagnostic {
    fn at(token: &Token<'_>, message: impl Into<String>) -> Self {
        Self {
            line: token.line,
            col: token.col,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<kernel source>:{}:{}: error: {}",
            self.line, self.col, self.message
        )
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ParsedKernel {
    pub signature: KernelSignature,
    pub line: usize,
    pub col: usize,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ParsedSource {
    pub kernels: Vec<ParsedKernel>,
    /// Position of the first use of a double-precision type.
    pub fp64_use: Option<(usize, usize)>,
}

/// Builds `source` for one device. On failure the error is the build log.
pub(crate) fn compile(
    source: &str,
    device: &DeviceInfo,
    library: &NativeLibrary,
) -> Result<Vec<KernelSignature>, String> {
    let parsed = parse(source).map_err(|diags| render_log(&diags))?;
    let mut diags = Vec::new();

    if let Some((line, col)) = parsed.fp64_use {
        if !device.extensions.iter().any(|e| e == FP64_EXTENSION) {
            diags.push(Diagnostic {
                line,
                col,
                message: format!(
                    "type 'double' requires {}, which '{}' does not support",
                    FP64_EXTENSION, device.name
                ),
            });
        }
    }

    for kernel in &parsed.kernels {
        let name = &kernel.signature.name;
        let message = match library.get(name) {
            None => Some(format!(
                "no native implementation registered for kernel '{}'",
                name
            )),
            Some(native) => {
                let expected = native.arg_kinds();
                let declared = kernel.signature.arg_kinds();
                (expected != declared).then(|| {
                    format!(
                        "kernel '{}' declares ({}) but its native implementation takes ({})",
                        name,
                        describe_kinds(&declared),
                        describe_kinds(&expected)
                    )
                })
            }
        };

        if let Some(message) = message {
            diags.push(Diagnostic {
                line: kernel.line,
                col: kernel.col,
                message,
            });
        }
    }

    if diags.is_empty() {
        Ok(parsed.kernels.into_iter().map(|k| k.signature).collect())
    } else {
        Err(render_log(&diags))
    }
}

fn describe_kinds(kinds: &[ArgKind]) -> String {
    kinds
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_log(diags: &[Diagnostic]) -> String {
    let mut log = String::new();
    for diag in diags {
        log.push_str(&diag.to_string());
        log.push('\n');
    }
    log.push_str(&format!("{} error(s) generated.", diags.len()));
    log
}

pub(crate) fn parse(source: &str) -> Result<ParsedSource, Vec<Diagnostic>> {
    let tokens = Lexer::new(source).tokenize().map_err(|d| vec![d])?;

    let mut diags = check_balance(&tokens);
    if !diags.is_empty() {
        return Err(diags);
    }

    let mut parsed = ParsedSource {
        fp64_use: tokens
            .iter()
            .find(|t| t.kind == TokenKind::Ident && is_double_type(t.text))
            .map(|t| (t.line, t.col)),
        ..ParsedSource::default()
    };

    let mut i = 0;
    while i < tokens.len() {
        let tok = &tokens[i];
        if tok.kind != TokenKind::Ident || !matches!(tok.text, "__kernel" | "kernel") {
            i += 1;
            continue;
        }

        match parse_kernel(&tokens, i + 1) {
            Ok((kernel, next)) => {
                if parsed
                    .kernels
                    .iter()
                    .any(|k| k.signature.name == kernel.signature.name)
                {
                    diags.push(Diagnostic {
                        line: kernel.line,
                        col: kernel.col,
                        message: format!("redefinition of kernel '{}'", kernel.signature.name),
                    });
                } else {
                    parsed.kernels.push(kernel);
                }
                i = next;
            }
            Err(diag) => {
                diags.push(diag);
                i += 1;
            }
        }
    }

    if diags.is_empty() {
        Ok(parsed)
    } else {
        Err(diags)
    }
}

fn is_double_type(ident: &str) -> bool {
    ident
        .strip_prefix("double")
        .is_some_and(|rest| rest.chars().all(|c| c.is_ascii_digit()))
}

fn check_balance(tokens: &[Token<'_>]) -> Vec<Diagnostic> {
    let mut stack: Vec<&Token<'_>> = Vec::new();
    let mut diags = Vec::new();

    for tok in tokens.iter().filter(|t| t.kind == TokenKind::Punct) {
        match tok.text {
            "(" | "{" | "[" => stack.push(tok),
            ")" | "}" | "]" => {
                let opener = match tok.text {
                    ")" => "(",
                    "}" => "{",
                    _ => "[",
                };
                match stack.pop() {
                    Some(open) if open.text == opener => {}
                    Some(open) => {
                        diags.push(Diagnostic::at(
                            tok,
                            format!("'{}' does not match '{}'", tok.text, open.text),
                        ));
                        return diags;
                    }
                    None => {
                        diags.push(Diagnostic::at(
                            tok,
                            format!("extraneous closing '{}'", tok.text),
                        ));
                        return diags;
                    }
                }
            }
            _ => {}
        }
    }

    for open in stack {
        diags.push(Diagnostic::at(open, format!("unmatched '{}'", open.text)));
    }
    diags
}

/// Index of the token closing the group opened at `open`. Brackets are
/// known to be balanced by the time this runs.
fn closing(tokens: &[Token<'_>], open: usize) -> usize {
    let mut depth = 0usize;
    for (i, tok) in tokens.iter().enumerate().skip(open) {
        if tok.kind != TokenKind::Punct {
            continue;
        }
        match tok.text {
            "(" | "{" | "[" => depth += 1,
            ")" | "}" | "]" => {
                depth -= 1;
                if depth == 0 {
                    return i;
                }
            }
            _ => {}
        }
    }
    tokens.len().saturating_sub(1)
}

fn parse_kernel(tokens: &[Token<'_>], start: usize) -> Result<(ParsedKernel, usize), Diagnostic> {
    let mut i = start;

    while tokens.get(i).is_some_and(|t| t.text == "__attribute__") {
        match tokens.get(i + 1) {
            Some(t) if t.text == "(" => i = closing(tokens, i + 1) + 1,
            Some(t) => return Err(Diagnostic::at(t, "expected '(' after '__attribute__'")),
            None => return Err(Diagnostic::at(&tokens[i], "unexpected end of source")),
        }
    }

    let anchor = &tokens[start - 1];
    let ret = ident_at(tokens, i, anchor, "expected return type after '__kernel'")?;
    let name = ident_at(tokens, i + 1, ret, "expected kernel name")?;

    if ret.text != "void" {
        return Err(Diagnostic::at(
            ret,
            format!(
                "kernel function '{}' must have a 'void' return type",
                name.text
            ),
        ));
    }

    match tokens.get(i + 2) {
        Some(t) if t.text == "(" => {}
        Some(t) => return Err(Diagnostic::at(t, "expected '(' after kernel name")),
        None => return Err(Diagnostic::at(name, "expected '(' after kernel name")),
    }

    let open = i + 2;
    let close = closing(tokens, open);
    let params = &tokens[open + 1..close];

    let mut args = Vec::new();
    let is_void_list = params.len() == 1 && params[0].text == "void";
    if !params.is_empty() && !is_void_list {
        let mut depth = 0usize;
        let mut begin = 0;
        for (j, tok) in params.iter().enumerate() {
            match tok.text {
                "(" | "[" | "{" => depth += 1,
                ")" | "]" | "}" => depth = depth.saturating_sub(1),
                "," if depth == 0 => {
                    args.push(parse_param(&params[begin..j], tok)?);
                    begin = j + 1;
                }
                _ => {}
            }
        }
        args.push(parse_param(&params[begin..], &tokens[close])?);
    }

    let kernel = ParsedKernel {
        signature: KernelSignature {
            name: name.text.to_string(),
            args,
        },
        line: name.line,
        col: name.col,
    };
    Ok((kernel, close + 1))
}

fn ident_at<'t, 'a>(
    tokens: &'t [Token<'a>],
    index: usize,
    previous: &'t Token<'a>,
    message: &str,
) -> Result<&'t Token<'a>, Diagnostic> {
    match tokens.get(index) {
        Some(t) if t.kind == TokenKind::Ident => Ok(t),
        Some(t) => Err(Diagnostic::at(t, message)),
        None => Err(Diagnostic::at(previous, message)),
    }
}

fn parse_param(tokens: &[Token<'_>], delimiter: &Token<'_>) -> Result<ArgSignature, Diagnostic> {
    let Some(first) = tokens.first() else {
        return Err(Diagnostic::at(delimiter, "expected parameter declaration"));
    };

    let mut space = None;
    let mut pointer = false;
    let mut unsigned = false;
    let mut words = Vec::new();

    for tok in tokens {
        match tok.text {
            "__global" | "global" => space = Some("__global"),
            "__constant" | "constant" => space = Some("__constant"),
            "__local" | "local" => space = Some("__local"),
            "__private" | "private" => space = Some("__private"),
            "const" | "volatile" | "restrict" | "__restrict" | "signed" => {}
            "unsigned" => unsigned = true,
            "*" => pointer = true,
            _ if tok.kind == TokenKind::Ident => words.push(tok),
            other => {
                return Err(Diagnostic::at(
                    tok,
                    format!("unexpected '{}' in parameter declaration", other),
                ))
            }
        }
    }

    let Some((name, type_words)) = words.split_last() else {
        return Err(Diagnostic::at(first, "expected parameter name"));
    };

    let base = match (unsigned, type_words) {
        (true, []) => "uint".to_string(),
        (true, [t]) => format!("u{}", t.text),
        (false, [t]) => t.text.to_string(),
        (false, []) => {
            return Err(Diagnostic::at(
                name,
                format!("missing type for parameter '{}'", name.text),
            ))
        }
        (_, [t, ..]) => {
            return Err(Diagnostic::at(
                t,
                format!("unsupported parameter type for '{}'", name.text),
            ))
        }
    };

    let known = (base == "void" && pointer) || scalar_size(&base).is_some();
    if !known {
        return Err(Diagnostic::at(
            type_words.first().copied().unwrap_or(*name),
            format!("unknown type name '{}'", base),
        ));
    }

    if pointer {
        let kind = match space {
            Some("__global") => ArgKind::GlobalBuffer,
            Some("__constant") => ArgKind::ConstantBuffer,
            Some("__local") => ArgKind::LocalMemory,
            _ => {
                return Err(Diagnostic::at(
                    name,
                    format!(
                        "pointer parameter '{}' must be declared __global, __constant or __local",
                        name.text
                    ),
                ))
            }
        };
        return Ok(ArgSignature {
            name: name.text.to_string(),
            type_name: format!("{}*", base),
            kind,
        });
    }

    if let Some(qualifier) = space.filter(|s| *s != "__private") {
        return Err(Diagnostic::at(
            name,
            format!(
                "parameter '{}' in the {} address space must be a pointer",
                name.text, qualifier
            ),
        ));
    }

    let size = scalar_size(&base).unwrap_or(0);
    Ok(ArgSignature {
        name: name.text.to_string(),
        type_name: base,
        kind: ArgKind::Scalar { size },
    })
}

pub(crate) fn scalar_size(type_name: &str) -> Option<usize> {
    let size = match type_name {
        "char" | "uchar" | "bool" => 1,
        "short" | "ushort" | "half" => 2,
        "int" | "uint" | "float" => 4,
        "long" | "ulong" | "double" | "size_t" | "float2" | "int2" | "uint2" => 8,
        "float4" | "int4" | "uint4" | "double2" | "long2" => 16,
        "float8" | "int8" | "double4" => 32,
        "float16" | "double8" => 64,
        _ => return None,
    };
    Some(size)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Ident,
    Number,
    Punct,
    Literal,
}

#[derive(Debug, Clone)]
struct Token<'a> {
    kind: TokenKind,
    text: &'a str,
    line: usize,
    col: usize,
}

struct Lexer<'a> {
    src: &'a str,
    chars: Peekable<CharIndices<'a>>,
    line: usize,
    col: usize,
    at_line_start: bool,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            chars: src.char_indices().peekable(),
            line: 1,
            col: 1,
            at_line_start: true,
        }
    }

    fn bump(&mut self) -> Option<(usize, char)> {
        let (i, c) = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
            self.at_line_start = true;
        } else {
            self.col += 1;
        }
        Some((i, c))
    }

    fn bump_while(&mut self, pred: impl Fn(char) -> bool) -> usize {
        while let Some(&(_, c)) = self.chars.peek() {
            if !pred(c) {
                break;
            }
            self.bump();
        }
        self.offset()
    }

    fn offset(&mut self) -> usize {
        self.chars.peek().map_or(self.src.len(), |&(i, _)| i)
    }

    fn tokenize(mut self) -> Result<Vec<Token<'a>>, Diagnostic> {
        let mut tokens = Vec::new();

        while let Some(&(start, c)) = self.chars.peek() {
            let (line, col) = (self.line, self.col);
            let rest = &self.src[start..];

            if c.is_whitespace() {
                self.bump();
                continue;
            }

            if rest.starts_with("//") {
                self.bump_while(|c| c != '\n');
                continue;
            }

            if rest.starts_with("/*") {
                match rest[2..].find("*/") {
                    Some(end) => {
                        let stop = start + 2 + end + 2;
                        while self.offset() < stop {
                            self.bump();
                        }
                    }
                    None => {
                        return Err(Diagnostic {
                            line,
                            col,
                            message: "unterminated /* comment".to_string(),
                        })
                    }
                }
                continue;
            }

            if c == '#' && self.at_line_start {
                // preprocessor line, with continuations
                loop {
                    self.bump_while(|c| c != '\n');
                    let end = self.offset();
                    let continued = self.src[..end].trim_end_matches('\r').ends_with('\\');
                    if !continued || self.chars.peek().is_none() {
                        break;
                    }
                    self.bump();
                }
                continue;
            }

            self.at_line_start = false;

            let kind = if c.is_ascii_alphabetic() || c == '_' {
                self.bump_while(|c| c.is_ascii_alphanumeric() || c == '_');
                TokenKind::Ident
            } else if c.is_ascii_digit() {
                self.bump_while(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_');
                TokenKind::Number
            } else if c == '"' || c == '\'' {
                self.bump();
                let mut escaped = false;
                loop {
                    match self.bump() {
                        Some((_, '\\')) if !escaped => escaped = true,
                        Some((_, q)) if q == c && !escaped => break,
                        Some((_, '\n')) | None => {
                            return Err(Diagnostic {
                                line,
                                col,
                                message: format!("missing terminating {} character", c),
                            })
                        }
                        Some(_) => escaped = false,
                    }
                }
                TokenKind::Literal
            } else {
                self.bump();
                TokenKind::Punct
            };

            let end = self.offset();
            tokens.push(Token {
                kind,
                text: &self.src[start..end],
                line,
                col,
            });
        }

        Ok(tokens)
    }
}
