//! Kernel signature scanner for the mock driver
//!
//! Not a compiler: it strips comments, checks bracket balance, honours
//! `#error`, and extracts `__kernel` signatures with their qualifiers. That
//! is enough to give the binding realistic build logs, kernel names and
//! argument metadata without a device.

use crate::driver::sys::{
    cl_bitfield, cl_uint, CL_KERNEL_ARG_ACCESS_NONE, CL_KERNEL_ARG_ACCESS_READ_ONLY,
    CL_KERNEL_ARG_ACCESS_READ_WRITE, CL_KERNEL_ARG_ACCESS_WRITE_ONLY, CL_KERNEL_ARG_ADDRESS_CONSTANT,
    CL_KERNEL_ARG_ADDRESS_GLOBAL, CL_KERNEL_ARG_ADDRESS_LOCAL, CL_KERNEL_ARG_ADDRESS_PRIVATE,
    CL_KERNEL_ARG_TYPE_CONST, CL_KERNEL_ARG_TYPE_NONE, CL_KERNEL_ARG_TYPE_RESTRICT,
    CL_KERNEL_ARG_TYPE_VOLATILE,
};

/// One kernel argument as declared
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ArgSig {
    pub name: String,
    pub type_name: String,
    pub address: cl_uint,
    pub access: cl_uint,
    pub type_qualifiers: cl_bitfield,
}

impl ArgSig {
    /// Pointer arguments take a `cl_mem` (global/constant) or a size (local)
    pub fn is_pointer(&self) -> bool {
        self.type_name.ends_with('*')
    }

    /// Byte size of a by-value scalar, when the type is a known builtin
    pub fn scalar_size(&self) -> Option<usize> {
        match self.type_name.as_str() {
            "char" | "uchar" | "unsigned char" | "bool" => Some(1),
            "short" | "ushort" | "unsigned short" | "half" => Some(2),
            "int" | "uint" | "unsigned int" | "unsigned" | "float" => Some(4),
            "long" | "ulong" | "unsigned long" | "double" | "size_t" => Some(8),
            _ => None,
        }
    }
}

/// One `__kernel` function
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct KernelSig {
    pub name: String,
    pub attributes: Vec<String>,
    pub args: Vec<ArgSig>,
}

/// Scan `source`; `Err` carries the build log
pub(crate) fn compile(source: &str) -> Result<Vec<KernelSig>, String> {
    let code = strip_comments(source)?;
    check_directives(&code)?;
    check_balance(&code)?;

    let tokens = tokenize(&code);
    let mut kernels: Vec<KernelSig> = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        let tok = tokens[i].text.as_str();
        if tok != "__kernel" && tok != "kernel" {
            i += 1;
            continue;
        }
        let line = tokens[i].line;
        let mut j = i + 1;
        let mut attributes = Vec::new();
        while tokens.get(j).map(|t| t.text.as_str()) == Some("__attribute__") {
            let (attr, next) = attribute(&tokens, j + 1)
                .ok_or_else(|| format!("line {}: error: malformed __attribute__", line))?;
            attributes.push(attr);
            j = next;
        }
        if tokens.get(j).map(|t| t.text.as_str()) != Some("void") {
            if tok == "__kernel" {
                return Err(format!("line {}: error: kernel function must return void", line));
            }
            i += 1;
            continue;
        }
        let name = tokens
            .get(j + 1)
            .filter(|t| is_ident(&t.text))
            .map(|t| t.text.clone())
            .ok_or_else(|| format!("line {}: error: expected kernel name", line))?;
        if tokens.get(j + 2).map(|t| t.text.as_str()) != Some("(") {
            return Err(format!("line {}: error: expected '(' after '{}'", line, name));
        }
        let close = matching(&tokens, j + 2)
            .ok_or_else(|| format!("line {}: error: expected ')'", line))?;
        let args = parameters(&tokens[j + 3..close], line)?;
        if kernels.iter().any(|k| k.name == name) {
            return Err(format!("line {}: error: redefinition of kernel '{}'", line, name));
        }
        kernels.push(KernelSig {
            name,
            attributes,
            args,
        });
        i = close + 1;
    }
    Ok(kernels)
}

// ============================================================================
// Lexing
// ============================================================================

#[derive(Debug, Clone)]
struct Token {
    text: String,
    line: usize,
}

fn strip_comments(source: &str) -> Result<String, String> {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    let mut line = 1;
    while let Some(c) = chars.next() {
        match (c, chars.peek()) {
            ('/', Some('/')) => {
                for n in chars.by_ref() {
                    if n == '\n' {
                        out.push('\n');
                        line += 1;
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let start = line;
                let mut prev = ' ';
                let mut closed = false;
                for n in chars.by_ref() {
                    if n == '\n' {
                        out.push('\n');
                        line += 1;
                    }
                    if prev == '*' && n == '/' {
                        closed = true;
                        break;
                    }
                    prev = n;
                }
                if !closed {
                    return Err(format!("line {}: error: unterminated comment", start));
                }
                out.push(' ');
            }
            _ => {
                if c == '\n' {
                    line += 1;
                }
                out.push(c);
            }
        }
    }
    Ok(out)
}

fn check_directives(code: &str) -> Result<(), String> {
    for (n, text) in code.lines().enumerate() {
        if let Some(rest) = text.trim_start().strip_prefix("#error") {
            return Err(format!("line {}: error: {}", n + 1, rest.trim()));
        }
    }
    Ok(())
}

fn check_balance(code: &str) -> Result<(), String> {
    let mut stack: Vec<(char, usize)> = Vec::new();
    for (n, text) in code.lines().enumerate() {
        for c in text.chars() {
            match c {
                '(' | '[' | '{' => stack.push((c, n + 1)),
                ')' | ']' | '}' => {
                    let open = match c {
                        ')' => '(',
                        ']' => '[',
                        _ => '{',
                    };
                    match stack.pop() {
                        Some((o, _)) if o == open => {}
                        Some((o, line)) => {
                            return Err(format!(
                                "line {}: error: '{}' does not close '{}' opened on line {}",
                                n + 1,
                                c,
                                o,
                                line
                            ))
                        }
                        None => return Err(format!("line {}: error: unexpected '{}'", n + 1, c)),
                    }
                }
                _ => {}
            }
        }
    }
    match stack.pop() {
        Some((o, line)) => Err(format!("line {}: error: unbalanced '{}'", line, o)),
        None => Ok(()),
    }
}

fn tokenize(code: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    for (n, text) in code.lines().enumerate() {
        if text.trim_start().starts_with('#') {
            continue;
        }
        let mut chars = text.char_indices().peekable();
        while let Some((start, c)) = chars.next() {
            if c.is_whitespace() {
                continue;
            }
            let mut end = start + c.len_utf8();
            if c.is_ascii_alphanumeric() || c == '_' {
                while let Some(&(i, next)) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        end = i + next.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
            }
            tokens.push(Token {
                text: text[start..end].to_string(),
                line: n + 1,
            });
        }
    }
    tokens
}

fn is_ident(text: &str) -> bool {
    text.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
}

/// Index of the bracket closing the one at `open`
fn matching(tokens: &[Token], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, tok) in tokens.iter().enumerate().skip(open) {
        match tok.text.as_str() {
            "(" => depth += 1,
            ")" => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// `((inner))` starting at `at`; returns the inner text and the next index
fn attribute(tokens: &[Token], at: usize) -> Option<(String, usize)> {
    if tokens.get(at)?.text != "(" || tokens.get(at + 1)?.text != "(" {
        return None;
    }
    let close = matching(tokens, at)?;
    let inner: String = tokens[at + 2..close - 1]
        .iter()
        .map(|t| t.text.as_str())
        .collect();
    Some((inner, close + 1))
}

// ============================================================================
// Parameters
// ============================================================================

fn parameters(tokens: &[Token], line: usize) -> Result<Vec<ArgSig>, String> {
    if tokens.is_empty() || (tokens.len() == 1 && tokens[0].text == "void") {
        return Ok(Vec::new());
    }
    tokens
        .split(|t| t.text == ",")
        .map(|param| parameter(param, line))
        .collect()
}

fn parameter(tokens: &[Token], line: usize) -> Result<ArgSig, String> {
    let (last, rest) = tokens
        .split_last()
        .ok_or_else(|| format!("line {}: error: empty parameter", line))?;
    if !is_ident(&last.text) || rest.is_empty() {
        return Err(format!("line {}: error: parameter without a name", line));
    }

    let mut address = CL_KERNEL_ARG_ADDRESS_PRIVATE;
    let mut access = CL_KERNEL_ARG_ACCESS_NONE;
    let mut type_qualifiers = CL_KERNEL_ARG_TYPE_NONE;
    let mut words: Vec<&str> = Vec::new();
    let mut pointers = 0;
    for tok in rest {
        match tok.text.as_str() {
            "__global" | "global" => address = CL_KERNEL_ARG_ADDRESS_GLOBAL,
            "__local" | "local" => address = CL_KERNEL_ARG_ADDRESS_LOCAL,
            "__constant" | "constant" => address = CL_KERNEL_ARG_ADDRESS_CONSTANT,
            "__private" | "private" => address = CL_KERNEL_ARG_ADDRESS_PRIVATE,
            "__read_only" | "read_only" => access = CL_KERNEL_ARG_ACCESS_READ_ONLY,
            "__write_only" | "write_only" => access = CL_KERNEL_ARG_ACCESS_WRITE_ONLY,
            "__read_write" | "read_write" => access = CL_KERNEL_ARG_ACCESS_READ_WRITE,
            "const" => type_qualifiers |= CL_KERNEL_ARG_TYPE_CONST,
            "restrict" | "__restrict" => type_qualifiers |= CL_KERNEL_ARG_TYPE_RESTRICT,
            "volatile" => type_qualifiers |= CL_KERNEL_ARG_TYPE_VOLATILE,
            "*" => pointers += 1,
            word if is_ident(word) => words.push(word),
            other => {
                return Err(format!(
                    "line {}: error: unexpected '{}' in parameter '{}'",
                    line, other, last.text
                ))
            }
        }
    }
    if words.is_empty() {
        return Err(format!("line {}: error: parameter '{}' has no type", line, last.text));
    }

    Ok(ArgSig {
        name: last.text.clone(),
        type_name: format!("{}{}", words.join(" "), "*".repeat(pointers)),
        address,
        access,
        type_qualifiers,
    })
}
