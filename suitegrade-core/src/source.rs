//! Lexical source-unit extraction
//!
//! Turns one file's text into the facts every later stage consumes:
//! contract declarations, function declarations, imports and the unit's role.
//! Deliberately regex/brace-level; no AST is built.
//!
//! Global invariants enforced:
//! - Pure function of (path, text)
//! - Comments never contribute facts; line numbers survive comment stripping
//! - Declarations are reported in source order

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// What a unit is for within the project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitRole {
    Contract,
    Test,
    Mock,
}

/// Kind of a top-level declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclKind {
    Contract,
    AbstractContract,
    Interface,
    Library,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    External,
    Internal,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mutability {
    NonPayable,
    Payable,
    View,
    Pure,
}

/// A `contract` / `interface` / `library` declaration
#[derive(Debug, Clone, PartialEq)]
pub struct ContractDecl {
    pub name: String,
    pub kind: DeclKind,
    /// Inheritance tokens from `is A, B(args)`, constructor args dropped
    pub bases: Vec<String>,
    pub line: u32,
    /// Byte range of the body (between the braces) within `SourceUnit::code`
    pub body_start: usize,
    pub body_end: usize,
}

/// A `function` declaration
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: String,
    /// Enclosing contract, `None` for free functions
    pub contract: Option<String>,
    pub params: Vec<String>,
    pub visibility: Visibility,
    pub mutability: Mutability,
    pub modifiers: Vec<String>,
    /// Body text between the braces; `None` for declarations without a body
    pub body: Option<String>,
    pub line: u32,
}

impl FunctionDecl {
    pub fn is_externally_callable(&self) -> bool {
        matches!(self.visibility, Visibility::Public | Visibility::External)
    }

    pub fn is_state_changing(&self) -> bool {
        matches!(self.mutability, Mutability::NonPayable | Mutability::Payable)
    }
}

/// One file's text plus its lexical facts. Immutable once built.
#[derive(Debug, Clone)]
pub struct SourceUnit {
    pub path: String,
    pub role: UnitRole,
    pub text: String,
    /// Text with comments blanked out (newlines preserved)
    pub code: String,
    /// Lower-cased `code`, computed once
    pub lowered: String,
    pub contracts: Vec<ContractDecl>,
    pub functions: Vec<FunctionDecl>,
    pub imports: Vec<String>,
}

impl SourceUnit {
    /// Parse a unit, inferring its role from path and content
    pub fn parse(path: &str, text: &str) -> Self {
        let code = strip_comments(text);
        let contracts = extract_contracts(&code);
        let functions = extract_functions(&code, &contracts);
        let imports = extract_imports(&code);
        let role = detect_role(path, &contracts);
        let lowered = code.to_lowercase();
        SourceUnit {
            path: path.to_string(),
            role,
            text: text.to_string(),
            code,
            lowered,
            contracts,
            functions,
            imports,
        }
    }

    /// Parse a unit with an explicit role
    pub fn with_role(path: &str, text: &str, role: UnitRole) -> Self {
        SourceUnit {
            role,
            ..Self::parse(path, text)
        }
    }

    pub fn function_names(&self) -> Vec<&str> {
        self.functions.iter().map(|f| f.name.as_str()).collect()
    }

    /// Functions declared outside interfaces (interfaces carry no behaviour)
    pub fn implemented_functions(&self) -> impl Iterator<Item = &FunctionDecl> {
        self.functions.iter().filter(move |f| {
            f.body.is_some()
                && f.contract
                    .as_deref()
                    .and_then(|c| self.contract(c))
                    .map_or(true, |c| c.kind != DeclKind::Interface)
        })
    }

    pub fn contract(&self, name: &str) -> Option<&ContractDecl> {
        self.contracts.iter().find(|c| c.name == name)
    }

    /// Body text of a contract declaration
    pub fn contract_body(&self, decl: &ContractDecl) -> &str {
        &self.code[decl.body_start..decl.body_end]
    }

    pub fn functions_of<'a>(&'a self, contract: &'a str) -> impl Iterator<Item = &'a FunctionDecl> {
        self.functions
            .iter()
            .filter(move |f| f.contract.as_deref() == Some(contract))
    }

    /// All inheritance tokens across the unit, in declaration order
    pub fn inheritance_tokens(&self) -> Vec<&str> {
        self.contracts
            .iter()
            .flat_map(|c| c.bases.iter().map(String::as_str))
            .collect()
    }

    /// File name component of the path
    pub fn file_name(&self) -> &str {
        self.path.rsplit(&['/', '\\'][..]).next().unwrap_or(&self.path)
    }
}

/// True for names following mock naming conventions (`MockOracle`, `OracleMock`,
/// `FakeToken`, `StubRouter`, `DummyFeed`)
pub fn is_mock_name(name: &str) -> bool {
    for prefix in ["Mock", "Fake", "Stub", "Dummy"] {
        if let Some(rest) = name.strip_prefix(prefix) {
            match rest.chars().next() {
                None => return true,
                Some(c) if c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_' => return true,
                _ => {}
            }
        }
    }
    name.len() > 4 && (name.ends_with("Mock") || name.ends_with("_mock"))
}

/// Blank out `//` and `/* */` comments, keeping string literals and newlines intact
pub fn strip_comments(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if c == b'"' || c == b'\'' {
            let end = skip_string(bytes, i);
            out.push_str(&text[i..end]);
            i = end;
        } else if c == b'/' && bytes.get(i + 1) == Some(&b'/') {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
        } else if c == b'/' && bytes.get(i + 1) == Some(&b'*') {
            i += 2;
            while i < bytes.len() && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                if bytes[i] == b'\n' {
                    out.push('\n');
                }
                i += 1;
            }
            i = (i + 2).min(bytes.len());
            out.push(' ');
        } else {
            // Copy a whole UTF-8 scalar
            let ch_len = utf8_len(c);
            let end = (i + ch_len).min(bytes.len());
            out.push_str(&text[i..end]);
            i = end;
        }
    }
    out
}

fn utf8_len(first: u8) -> usize {
    match first {
        0x00..=0x7F => 1,
        0xC0..=0xDF => 2,
        0xE0..=0xEF => 3,
        _ => 4,
    }
}

/// Index just past the closing quote of the string literal starting at `start`
fn skip_string(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' => return i,
            c if c == quote => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

/// Index of the bracket closing the one at `open`, skipping string literals
pub fn matching_close(code: &str, open: usize, open_ch: u8, close_ch: u8) -> Option<usize> {
    let bytes = code.as_bytes();
    let mut depth = 0usize;
    let mut i = open;
    while i < bytes.len() {
        let c = bytes[i];
        if c == b'"' || c == b'\'' {
            i = skip_string(bytes, i);
            continue;
        }
        if c == open_ch {
            depth += 1;
        } else if c == close_ch {
            depth = depth.saturating_sub(1);
            if depth == 0 {
                return Some(i);
            }
        }
        i += 1;
    }
    None
}

fn line_of(code: &str, offset: usize) -> u32 {
    code[..offset.min(code.len())].matches('\n').count() as u32 + 1
}

fn extract_contracts(code: &str) -> Vec<ContractDecl> {
    static DECL_RE: OnceLock<Regex> = OnceLock::new();
    let re = DECL_RE.get_or_init(|| {
        Regex::new(
            r"\b(abstract\s+contract|contract|interface|library)\s+([A-Za-z_$][\w$]*)\s*(?:is\s+([^{;]+?))?\s*\{",
        )
        .unwrap()
    });

    let mut decls = Vec::new();
    let mut resume_at = 0;
    for caps in re.captures_iter(code) {
        let whole = caps.get(0).unwrap();
        // Skip declarations nested inside an earlier body
        if whole.start() < resume_at {
            continue;
        }
        let kind = match caps.get(1).map(|m| m.as_str()) {
            Some("interface") => DeclKind::Interface,
            Some("library") => DeclKind::Library,
            Some("contract") => DeclKind::Contract,
            _ => DeclKind::AbstractContract,
        };
        let open = whole.end() - 1;
        let close = matching_close(code, open, b'{', b'}').unwrap_or(code.len());
        let bases = caps
            .get(3)
            .map(|m| split_top_level(m.as_str()))
            .unwrap_or_default()
            .into_iter()
            .filter_map(|b| {
                let name = b.split('(').next().unwrap_or("").trim().to_string();
                (!name.is_empty()).then_some(name)
            })
            .collect();
        decls.push(ContractDecl {
            name: caps[2].to_string(),
            kind,
            bases,
            line: line_of(code, whole.start()),
            body_start: open + 1,
            body_end: close.max(open + 1),
        });
        resume_at = close;
    }
    decls
}

const HEADER_KEYWORDS: &[&str] = &[
    "public", "external", "internal", "private", "view", "pure", "payable", "constant",
    "virtual", "override", "returns", "memory", "calldata", "storage",
];

fn extract_functions(code: &str, contracts: &[ContractDecl]) -> Vec<FunctionDecl> {
    static FN_RE: OnceLock<Regex> = OnceLock::new();
    static RETURNS_RE: OnceLock<Regex> = OnceLock::new();
    static IDENT_RE: OnceLock<Regex> = OnceLock::new();
    let fn_re = FN_RE.get_or_init(|| Regex::new(r"\bfunction\s+([A-Za-z_$][\w$]*)\s*\(").unwrap());
    let returns_re = RETURNS_RE.get_or_init(|| Regex::new(r"\breturns\s*\(").unwrap());
    let ident_re = IDENT_RE.get_or_init(|| Regex::new(r"[A-Za-z_$][\w$]*").unwrap());

    let mut functions = Vec::new();
    let mut resume_at = 0;
    for caps in fn_re.captures_iter(code) {
        let whole = caps.get(0).unwrap();
        if whole.start() < resume_at {
            continue;
        }
        let paren_open = whole.end() - 1;
        let Some(paren_close) = matching_close(code, paren_open, b'(', b')') else {
            continue;
        };
        let params: Vec<String> = split_top_level(&code[paren_open + 1..paren_close])
            .into_iter()
            .map(|p| p.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|p| !p.is_empty())
            .collect();

        // Header runs to the body brace or the terminating semicolon
        let rest = &code[paren_close + 1..];
        let header_len = rest.find(&['{', ';'][..]).unwrap_or(rest.len());
        let mut header = rest[..header_len].to_string();
        if let Some(m) = returns_re.find(&header) {
            let abs_open = m.end() - 1;
            let close = matching_close(&header, abs_open, b'(', b')').unwrap_or(header.len() - 1);
            header.replace_range(m.start()..=close, " ");
        }

        let mut visibility = Visibility::Public;
        let mut mutability = Mutability::NonPayable;
        let mut modifiers = Vec::new();
        let mut skip_depth = 0usize;
        for tok in header.split_inclusive(&['(', ')', ' ', '\n', '\t', ','][..]) {
            // Ignore modifier arguments
            let opens = tok.matches('(').count();
            let closes = tok.matches(')').count();
            let was_inside = skip_depth > 0;
            skip_depth = (skip_depth + opens).saturating_sub(closes);
            if was_inside {
                continue;
            }
            let Some(word) = ident_re.find(tok).map(|m| m.as_str()) else {
                continue;
            };
            match word {
                "public" => visibility = Visibility::Public,
                "external" => visibility = Visibility::External,
                "internal" => visibility = Visibility::Internal,
                "private" => visibility = Visibility::Private,
                "view" | "constant" => mutability = Mutability::View,
                "pure" => mutability = Mutability::Pure,
                "payable" => mutability = Mutability::Payable,
                w if HEADER_KEYWORDS.contains(&w) => {}
                w => modifiers.push(w.to_string()),
            }
        }

        let terminator = paren_close + 1 + header_len;
        let body = if code.as_bytes().get(terminator) == Some(&b'{') {
            let close = matching_close(code, terminator, b'{', b'}').unwrap_or(code.len());
            resume_at = close;
            Some(code[terminator + 1..close.min(code.len())].to_string())
        } else {
            None
        };

        let start = whole.start();
        let contract = contracts
            .iter()
            .find(|c| start >= c.body_start && start < c.body_end)
            .map(|c| c.name.clone());

        functions.push(FunctionDecl {
            name: caps[1].to_string(),
            contract,
            params,
            visibility,
            mutability,
            modifiers,
            body,
            line: line_of(code, start),
        });
    }
    functions
}

fn extract_imports(code: &str) -> Vec<String> {
    static IMPORT_RE: OnceLock<Regex> = OnceLock::new();
    let re = IMPORT_RE.get_or_init(|| {
        Regex::new(r#"(?m)^\s*import\s+(?:[^"';]*\bfrom\s+)?["']([^"']+)["']"#).unwrap()
    });
    re.captures_iter(code).map(|c| c[1].to_string()).collect()
}

/// Split on commas that are not nested inside parentheses
fn split_top_level(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for ch in s.chars() {
        match ch {
            '(' => {
                depth += 1;
                current.push(ch);
            }
            ')' => {
                depth -= 1;
                current.push(ch);
            }
            ',' if depth == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

/// Infer a unit's role from its path and declarations
pub fn detect_role(path: &str, contracts: &[ContractDecl]) -> UnitRole {
    let normalized = path.replace('\\', "/").to_lowercase();
    if normalized.ends_with(".t.sol") {
        return UnitRole::Test;
    }
    let segments: Vec<&str> = normalized.split('/').collect();
    let dirs = &segments[..segments.len().saturating_sub(1)];
    if dirs.iter().any(|s| *s == "mock" || *s == "mocks") {
        return UnitRole::Mock;
    }
    if !contracts.is_empty() && contracts.iter().all(|c| is_mock_name(&c.name)) {
        return UnitRole::Mock;
    }
    if dirs.iter().any(|s| *s == "test" || *s == "tests")
        || contracts.iter().any(|c| c.bases.iter().any(|b| b == "Test"))
    {
        return UnitRole::Test;
    }
    UnitRole::Contract
}

#[cfg(test)]
mod tests {
    use super::*;

    const VAULT: &str = r#"
// SPDX-License-Identifier: MIT
pragma solidity ^0.8.20;

import "./interfaces/IERC20.sol";
import {Ownable} from "@openzeppelin/contracts/access/Ownable.sol";

/* function ghost() external {} */
contract Vault is Ownable(msg.sender), ReentrancyGuard {
    mapping(address => uint256) public balances;

    function deposit(uint256 amount) external payable nonReentrant {
        balances[msg.sender] += amount; // function fake() {}
    }

    function withdraw(uint256 amount) external nonReentrant returns (bool ok) {
        require(balances[msg.sender] >= amount, "insufficient");
        balances[msg.sender] -= amount;
        return true;
    }

    function preview(uint256 shares) public view returns (uint256) {
        return shares;
    }

    function _sync() internal {}
}

interface IVault {
    function deposit(uint256 amount) external payable;
}
"#;

    #[test]
    fn extracts_contracts_with_bases() {
        let unit = SourceUnit::parse("src/Vault.sol", VAULT);
        assert_eq!(unit.contracts.len(), 2);
        assert_eq!(unit.contracts[0].name, "Vault");
        assert_eq!(unit.contracts[0].kind, DeclKind::Contract);
        assert_eq!(unit.contracts[0].bases, vec!["Ownable", "ReentrancyGuard"]);
        assert_eq!(unit.contracts[1].kind, DeclKind::Interface);
    }

    #[test]
    fn extracts_functions_ignoring_comments() {
        let unit = SourceUnit::parse("src/Vault.sol", VAULT);
        let names = unit.function_names();
        assert_eq!(names, vec!["deposit", "withdraw", "preview", "_sync", "deposit"]);
        assert!(!names.contains(&"ghost"));
        assert!(!names.contains(&"fake"));
    }

    #[test]
    fn function_headers_are_classified() {
        let unit = SourceUnit::parse("src/Vault.sol", VAULT);
        let deposit = &unit.functions[0];
        assert_eq!(deposit.visibility, Visibility::External);
        assert_eq!(deposit.mutability, Mutability::Payable);
        assert_eq!(deposit.modifiers, vec!["nonReentrant"]);
        assert_eq!(deposit.params, vec!["uint256 amount"]);
        assert_eq!(deposit.contract.as_deref(), Some("Vault"));

        let preview = &unit.functions[2];
        assert_eq!(preview.mutability, Mutability::View);
        assert!(preview.modifiers.is_empty(), "returns clause must not leak");

        let sync = &unit.functions[3];
        assert_eq!(sync.visibility, Visibility::Internal);
    }

    #[test]
    fn interface_functions_are_not_implemented() {
        let unit = SourceUnit::parse("src/Vault.sol", VAULT);
        let implemented: Vec<&str> = unit
            .implemented_functions()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(implemented, vec!["deposit", "withdraw", "preview", "_sync"]);
    }

    #[test]
    fn line_numbers_survive_block_comments() {
        let unit = SourceUnit::parse("src/Vault.sol", VAULT);
        assert_eq!(unit.contracts[0].line, 9);
        assert_eq!(unit.functions[0].line, 12);
    }

    #[test]
    fn imports_are_extracted() {
        let unit = SourceUnit::parse("src/Vault.sol", VAULT);
        assert_eq!(
            unit.imports,
            vec![
                "./interfaces/IERC20.sol",
                "@openzeppelin/contracts/access/Ownable.sol"
            ]
        );
    }

    #[test]
    fn strings_containing_comment_markers_are_kept() {
        let code = strip_comments("string s = \"http://x\"; // gone\nuint a;");
        assert_eq!(code, "string s = \"http://x\"; \nuint a;");
    }

    #[test]
    fn role_detection() {
        assert_eq!(detect_role("test/Vault.t.sol", &[]), UnitRole::Test);
        assert_eq!(detect_role("test/mocks/MockToken.sol", &[]), UnitRole::Mock);
        assert_eq!(detect_role("src/Vault.sol", &[]), UnitRole::Contract);

        let unit = SourceUnit::parse("src/MockOracle.sol", "contract MockOracle { }");
        assert_eq!(unit.role, UnitRole::Mock);

        let unit = SourceUnit::parse("foo/VaultTest.sol", "contract VaultTest is Test { }");
        assert_eq!(unit.role, UnitRole::Test);
    }

    #[test]
    fn mock_names() {
        assert!(is_mock_name("MockERC20"));
        assert!(is_mock_name("OracleMock"));
        assert!(is_mock_name("FakeRouter"));
        assert!(is_mock_name("Stub"));
        assert!(!is_mock_name("Mockingbird"));
        assert!(!is_mock_name("Vault"));
    }
}
