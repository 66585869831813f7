//! Filesystem tools, all confined to the configured workspace root.
//!
//! Every path input is decoded (`file://` URIs, percent-encoding, the
//! Windows `/X:/` quirk), resolved against the root, weakly
//! canonicalized, and required to stay under the canonical root.

use super::registry::ToolRegistry;
use super::{sync_handler, ToolResult, ToolSchema};
use regex::Regex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};

const MAX_LINE_LENGTH: usize = 2000;
const READ_DEFAULT_LIMIT: usize = 2000;
const READ_MAX_BYTES: usize = 50 * 1024;
const MATCH_LIMIT: usize = 100;

const SKIP_DIRS: &[&str] = &[".git", "node_modules", "dist", "build", "target", ".venv", "venv"];

const LIST_DEFAULT_IGNORES: &[&str] = &[
    "node_modules/**",
    "__pycache__/**",
    ".git/**",
    "dist/**",
    "build/**",
    "target/**",
    "vendor/**",
    "bin/**",
    "obj/**",
    ".idea/**",
    ".vscode/**",
    ".zig-cache/**",
    "zig-out/**",
    ".coverage/**",
    "coverage/**",
    "tmp/**",
    "temp/**",
    ".cache/**",
    "cache/**",
    "logs/**",
    ".venv/**",
    "venv/**",
    "env/**",
];

// ---------------------------------------------------------------------------
// path handling

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = |b: u8| -> Option<u8> {
                match b {
                    b'0'..=b'9' => Some(b - b'0'),
                    b'a'..=b'f' => Some(10 + b - b'a'),
                    b'A'..=b'F' => Some(10 + b - b'A'),
                    _ => None,
                }
            };
            if let (Some(hi), Some(lo)) = (hex(bytes[i + 1]), hex(bytes[i + 2])) {
                out.push((hi << 4) | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn decode_file_uri(path_or_uri: &str) -> String {
    let lower = path_or_uri.to_ascii_lowercase();
    if !lower.starts_with("file://") {
        return path_or_uri.to_string();
    }
    let mut raw = path_or_uri["file://".len()..].to_string();
    if let Some(rest) = raw.strip_prefix("localhost/") {
        raw = rest.to_string();
    }
    // `/C:/...` from Windows-style URIs
    let bytes = raw.as_bytes();
    if bytes.len() >= 3 && bytes[0] == b'/' && bytes[1].is_ascii_alphabetic() && bytes[2] == b':' {
        raw = raw[1..].to_string();
    }
    percent_decode(&raw)
}

fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Canonicalize the longest existing prefix and append the remainder
/// lexically normalized; never fails on paths that do not exist yet.
pub fn weakly_canonical(path: &Path) -> PathBuf {
    let mut existing = path.to_path_buf();
    let mut rest: Vec<std::ffi::OsString> = Vec::new();
    loop {
        match existing.canonicalize() {
            Ok(canon) => {
                let mut out = canon;
                for part in rest.iter().rev() {
                    out.push(part);
                }
                return lexical_normalize(&out);
            }
            Err(_) => match (existing.parent(), existing.file_name()) {
                (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => {
                    rest.push(name.to_os_string());
                    existing = parent.to_path_buf();
                }
                _ => return lexical_normalize(path),
            },
        }
    }
}

/// Decode, resolve against the workspace root, canonicalize, and assert
/// confinement. The error string is part of the tool contract.
pub fn normalize_under_root(workspace_root: &str, path_or_uri: &str) -> Result<PathBuf, String> {
    let raw = decode_file_uri(path_or_uri);
    let mut p = PathBuf::from(&raw);
    if !workspace_root.is_empty() && p.is_relative() {
        p = Path::new(workspace_root).join(p);
    }
    let canon = weakly_canonical(&p);
    if !workspace_root.is_empty() {
        let root = weakly_canonical(Path::new(workspace_root));
        if !canon.starts_with(&root) {
            return Err("path is outside workspace root".to_string());
        }
    }
    Ok(canon)
}

// ---------------------------------------------------------------------------
// glob handling

pub fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() * 2);
    out.push('^');
    let chars: Vec<char> = glob.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '*' => {
                if i + 1 < chars.len() && chars[i + 1] == '*' {
                    out.push_str(".*");
                    i += 1;
                } else {
                    out.push_str("[^/]*");
                }
            }
            '?' => out.push_str("[^/]"),
            '.' => out.push_str("\\."),
            '\\' | '/' => out.push('/'),
            '(' | ')' | '[' | ']' | '{' | '}' | '+' | '^' | '$' | '|' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
        i += 1;
    }
    out.push('$');
    out
}

pub fn expand_brace_glob(pattern: &str) -> Vec<String> {
    let Some(open) = pattern.find('{') else {
        return vec![pattern.to_string()];
    };
    let Some(close) = pattern[open + 1..].find('}').map(|p| p + open + 1) else {
        return vec![pattern.to_string()];
    };
    if close <= open + 1 {
        return vec![pattern.to_string()];
    }
    pattern[open + 1..close]
        .split(',')
        .map(|part| format!("{}{}{}", &pattern[..open], part, &pattern[close + 1..]))
        .collect()
}

fn compile_globs(patterns: &[String]) -> Result<Vec<Regex>, String> {
    let mut out = Vec::new();
    for pattern in patterns {
        for expanded in expand_brace_glob(pattern) {
            let re = Regex::new(&glob_to_regex(&expanded))
                .map_err(|e| format!("invalid glob pattern: {}", e))?;
            out.push(re);
        }
    }
    Ok(out)
}

fn match_any_glob(globs: &[Regex], rel: &str) -> bool {
    if globs.is_empty() {
        return true;
    }
    let rel = rel.replace('\\', "/");
    globs.iter().any(|re| re.is_match(&rel))
}

/// Walk regular files under `base`, skipping the shared directory skip
/// set, calling `visit(path, rel)` until it returns false.
fn walk_files(base: &Path, visit: &mut dyn FnMut(&Path, &str) -> bool) {
    let mut stack = vec![base.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
                if SKIP_DIRS.contains(&name) {
                    continue;
                }
                stack.push(path);
                continue;
            }
            if !path.is_file() {
                continue;
            }
            let rel = path
                .strip_prefix(base)
                .map(|r| r.to_string_lossy().replace('\\', "/"))
                .unwrap_or_else(|_| {
                    path.file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default()
                });
            if !visit(&path, &rel) {
                return;
            }
        }
    }
}

fn mtime_of(path: &Path) -> i128 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i128)
        .unwrap_or(0)
}

fn truncate_line(line: &str) -> String {
    if line.chars().count() > MAX_LINE_LENGTH {
        let mut shown: String = line.chars().take(MAX_LINE_LENGTH).collect();
        shown.push_str("...");
        shown
    } else {
        line.to_string()
    }
}

fn str_arg<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

fn int_arg(args: &Value, key: &str) -> Option<i64> {
    args.get(key).and_then(Value::as_i64)
}

// ---------------------------------------------------------------------------
// handlers

pub fn read_file(workspace_root: &str, name: &str, id: String, args: Value) -> ToolResult {
    let Some(file_path) = str_arg(&args, "filePath") else {
        return ToolResult::failure(id, name, "missing required field: filePath");
    };
    let offset = int_arg(&args, "offset").unwrap_or(0).max(0) as usize;
    let limit = match int_arg(&args, "limit") {
        Some(v) if v > 0 => v as usize,
        _ => READ_DEFAULT_LIMIT,
    };

    let norm = match normalize_under_root(workspace_root, file_path) {
        Ok(p) => p,
        Err(e) => return ToolResult::failure(id, name, e),
    };
    let Ok(text) = std::fs::read_to_string(&norm) else {
        return ToolResult::failure(id, name, "file not found");
    };

    let mut out_lines = Vec::new();
    let mut total_lines = 0usize;
    let mut bytes = 0usize;
    let mut truncated_by_bytes = false;
    for (idx, line) in text.lines().enumerate() {
        total_lines = idx + 1;
        if idx < offset || out_lines.len() >= limit {
            continue;
        }
        let shown = truncate_line(line);
        let add = shown.len() + if out_lines.is_empty() { 0 } else { 1 };
        if bytes + add > READ_MAX_BYTES {
            truncated_by_bytes = true;
            // keep counting total_lines but stop collecting
            continue;
        }
        bytes += add;
        out_lines.push(shown);
    }

    let last_read_line = offset + out_lines.len();
    let has_more_lines = total_lines > last_read_line;
    let truncated = has_more_lines || truncated_by_bytes;

    let mut output = String::from("<file>\n");
    for (i, line) in out_lines.iter().enumerate() {
        output.push_str(&format!("{:05}| {}", offset + i + 1, line));
        if i + 1 < out_lines.len() {
            output.push('\n');
        }
    }
    if truncated_by_bytes {
        output.push_str(&format!(
            "\n\n(Output truncated at {} bytes. Use 'offset' parameter to read beyond line {})",
            READ_MAX_BYTES, last_read_line
        ));
    } else if has_more_lines {
        output.push_str(&format!(
            "\n\n(File has more lines. Use 'offset' parameter to read beyond line {})",
            last_read_line
        ));
    } else {
        output.push_str(&format!("\n\n(End of file - total {} lines)", total_lines));
    }
    output.push_str("\n</file>");

    ToolResult::success(
        id,
        name,
        json!({
            "ok": true,
            "title": norm.to_string_lossy(),
            "output": output,
            "metadata": {
                "truncated": truncated,
                "lastReadLine": last_read_line,
                "totalLines": total_lines,
            },
        }),
    )
}

pub fn write_file(workspace_root: &str, name: &str, id: String, args: Value) -> ToolResult {
    let (Some(file_path), Some(content)) = (str_arg(&args, "filePath"), str_arg(&args, "content"))
    else {
        return ToolResult::failure(id, name, "missing required fields: filePath, content");
    };
    let norm = match normalize_under_root(workspace_root, file_path) {
        Ok(p) => p,
        Err(e) => return ToolResult::failure(id, name, e),
    };
    let existed = norm.exists();
    if let Some(parent) = norm.parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }
    if std::fs::write(&norm, content).is_err() {
        return ToolResult::failure(id, name, "failed to open file for writing");
    }
    ToolResult::success(
        id,
        name,
        json!({
            "ok": true,
            "title": norm.to_string_lossy(),
            "output": "",
            "metadata": { "filepath": norm.to_string_lossy(), "exists": existed },
        }),
    )
}

pub fn edit_file(workspace_root: &str, name: &str, id: String, args: Value) -> ToolResult {
    let (Some(file_path), Some(old_string), Some(new_string)) = (
        str_arg(&args, "filePath"),
        str_arg(&args, "oldString"),
        str_arg(&args, "newString"),
    ) else {
        return ToolResult::failure(id, name, "missing required fields: filePath, oldString, newString");
    };
    if old_string == new_string {
        return ToolResult::failure(id, name, "oldString and newString must be different");
    }
    let replace_all = args
        .get("replaceAll")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let norm = match normalize_under_root(workspace_root, file_path) {
        Ok(p) => p,
        Err(e) => return ToolResult::failure(id, name, e),
    };
    if let Some(parent) = norm.parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    if old_string.is_empty() {
        if std::fs::write(&norm, new_string).is_err() {
            return ToolResult::failure(id, name, "failed to open file for writing");
        }
        return ToolResult::success(
            id,
            name,
            json!({
                "ok": true,
                "title": norm.to_string_lossy(),
                "output": "",
                "metadata": { "filepath": norm.to_string_lossy() },
            }),
        );
    }

    let Ok(content) = std::fs::read_to_string(&norm) else {
        return ToolResult::failure(id, name, "file not found");
    };
    let occurrences = content.matches(old_string).count();
    if occurrences == 0 {
        return ToolResult::failure(id, name, "oldString not found in content");
    }
    let replacements;
    let updated = if replace_all {
        replacements = occurrences;
        content.replace(old_string, new_string)
    } else {
        if occurrences > 1 {
            return ToolResult::failure(
                id,
                name,
                "found multiple matches for oldString; set replaceAll=true or provide a more specific oldString",
            );
        }
        replacements = 1;
        content.replacen(old_string, new_string, 1)
    };
    if std::fs::write(&norm, updated).is_err() {
        return ToolResult::failure(id, name, "failed to open file for writing");
    }
    ToolResult::success(
        id,
        name,
        json!({
            "ok": true,
            "title": norm.to_string_lossy(),
            "output": "",
            "metadata": { "filepath": norm.to_string_lossy(), "replacements": replacements },
        }),
    )
}

pub fn glob_files(workspace_root: &str, name: &str, id: String, args: Value) -> ToolResult {
    let Some(pattern) = str_arg(&args, "pattern") else {
        return ToolResult::failure(id, name, "missing required field: pattern");
    };
    let base = str_arg(&args, "path").unwrap_or(".");
    let norm_base = match normalize_under_root(workspace_root, base) {
        Ok(p) => p,
        Err(e) => return ToolResult::failure(id, name, e),
    };
    let globs = match compile_globs(&[pattern.to_string()]) {
        Ok(g) => g,
        Err(e) => return ToolResult::failure(id, name, e),
    };

    let mut hits: Vec<(String, i128)> = Vec::new();
    let mut truncated = false;
    walk_files(&norm_base, &mut |path, rel| {
        if !match_any_glob(&globs, rel) {
            return true;
        }
        hits.push((path.to_string_lossy().replace('\\', "/"), mtime_of(path)));
        if hits.len() >= MATCH_LIMIT {
            truncated = true;
            return false;
        }
        true
    });
    hits.sort_by(|a, b| b.1.cmp(&a.1));

    let mut output = String::new();
    if hits.is_empty() {
        output.push_str("No files found");
    } else {
        output.push_str(
            &hits
                .iter()
                .map(|(p, _)| p.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        );
        if truncated {
            output.push_str("\n\n(Results are truncated. Consider using a more specific path or pattern.)");
        }
    }

    ToolResult::success(
        id,
        name,
        json!({
            "ok": true,
            "title": norm_base.to_string_lossy(),
            "output": output,
            "metadata": { "count": hits.len(), "truncated": truncated },
        }),
    )
}

pub fn grep_files(workspace_root: &str, name: &str, id: String, args: Value) -> ToolResult {
    let Some(pattern) = str_arg(&args, "pattern") else {
        return ToolResult::failure(id, name, "missing required field: pattern");
    };
    let base = str_arg(&args, "path").unwrap_or(".");
    let norm_base = match normalize_under_root(workspace_root, base) {
        Ok(p) => p,
        Err(e) => return ToolResult::failure(id, name, e),
    };
    let re = match Regex::new(pattern) {
        Ok(re) => re,
        Err(e) => return ToolResult::failure(id, name, format!("invalid regex: {}", e)),
    };
    let include_globs = match str_arg(&args, "include") {
        Some(inc) => compile_globs(&[inc.to_string()]).unwrap_or_default(),
        None => Vec::new(),
    };

    struct MatchHit {
        path: String,
        mtime: i128,
        line: usize,
        text: String,
    }
    let mut matches: Vec<MatchHit> = Vec::new();
    walk_files(&norm_base, &mut |path, rel| {
        if !match_any_glob(&include_globs, rel) {
            return true;
        }
        let Ok(text) = std::fs::read_to_string(path) else {
            return true;
        };
        let mtime = mtime_of(path);
        for (idx, line) in text.lines().enumerate() {
            if !re.is_match(line) {
                continue;
            }
            matches.push(MatchHit {
                path: path.to_string_lossy().replace('\\', "/"),
                mtime,
                line: idx + 1,
                text: truncate_line(line),
            });
            if matches.len() >= MATCH_LIMIT {
                return false;
            }
        }
        true
    });
    matches.sort_by(|a, b| b.mtime.cmp(&a.mtime));

    let truncated = matches.len() >= MATCH_LIMIT;
    let mut output = String::new();
    if matches.is_empty() {
        output.push_str("No files found");
    } else {
        output.push_str(&format!("Found {} matches\n", matches.len()));
        let mut current = String::new();
        for (i, m) in matches.iter().enumerate() {
            if m.path != current {
                if !current.is_empty() {
                    output.push('\n');
                }
                current = m.path.clone();
                output.push_str(&format!("{}:\n", current));
            }
            output.push_str(&format!("  Line {}: {}", m.line, m.text));
            if i + 1 < matches.len() {
                output.push('\n');
            }
        }
    }
    if truncated {
        output.push_str("\n\n(Results are truncated. Consider using a more specific path or pattern.)");
    }

    ToolResult::success(
        id,
        name,
        json!({
            "ok": true,
            "title": pattern,
            "output": output,
            "metadata": { "matches": matches.len(), "truncated": truncated },
        }),
    )
}

pub fn list_files(workspace_root: &str, name: &str, id: String, args: Value) -> ToolResult {
    let base = str_arg(&args, "path").unwrap_or(".");
    let norm_base = match normalize_under_root(workspace_root, base) {
        Ok(p) => p,
        Err(e) => return ToolResult::failure(id, name, e),
    };

    let mut ignore_patterns: Vec<String> =
        LIST_DEFAULT_IGNORES.iter().map(|s| s.to_string()).collect();
    if let Some(extra) = args.get("ignore").and_then(Value::as_array) {
        ignore_patterns.extend(extra.iter().filter_map(Value::as_str).map(str::to_string));
    }
    let ignore_globs = compile_globs(&ignore_patterns).unwrap_or_default();

    let mut files: Vec<String> = Vec::new();
    walk_files(&norm_base, &mut |_path, rel| {
        if !ignore_globs.is_empty() && match_any_glob(&ignore_globs, rel) {
            return true;
        }
        files.push(rel.to_string());
        files.len() < MATCH_LIMIT
    });
    files.sort();

    // group files by directory, then render the tree
    let mut dirs: BTreeSet<String> = BTreeSet::new();
    dirs.insert(".".to_string());
    let mut files_by_dir: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for f in &files {
        let (dir, file) = match f.rfind('/') {
            Some(pos) => (f[..pos].to_string(), f[pos + 1..].to_string()),
            None => (".".to_string(), f.clone()),
        };
        files_by_dir.entry(dir.clone()).or_default().push(file);
        if dir != "." {
            let mut prefix = String::new();
            for part in dir.split('/') {
                if !prefix.is_empty() {
                    prefix.push('/');
                }
                prefix.push_str(part);
                dirs.insert(prefix.clone());
            }
        }
    }

    fn render_dir(
        dir: &str,
        depth: usize,
        dirs: &BTreeSet<String>,
        files_by_dir: &BTreeMap<String, Vec<String>>,
    ) -> String {
        let mut out = String::new();
        if depth > 0 {
            let label = dir.rsplit('/').next().unwrap_or(dir);
            out.push_str(&"  ".repeat(depth));
            out.push_str(label);
            out.push_str("/\n");
        }
        for child in dirs.iter().filter(|d| {
            d.as_str() != "." && d.as_str() != dir && {
                let parent = d.rfind('/').map(|p| &d[..p]).unwrap_or(".");
                parent == dir
            }
        }) {
            out.push_str(&render_dir(child, depth + 1, dirs, files_by_dir));
        }
        if let Some(entries) = files_by_dir.get(dir) {
            for file in entries {
                out.push_str(&"  ".repeat(depth + 1));
                out.push_str(file);
                out.push('\n');
            }
        }
        out
    }

    let mut output = norm_base.to_string_lossy().replace('\\', "/");
    if !output.ends_with('/') {
        output.push('/');
    }
    output.push('\n');
    output.push_str(&render_dir(".", 0, &dirs, &files_by_dir));

    ToolResult::success(
        id,
        name,
        json!({
            "ok": true,
            "title": norm_base.to_string_lossy(),
            "output": output,
            "metadata": { "count": files.len(), "truncated": files.len() >= MATCH_LIMIT },
        }),
    )
}

// ---------------------------------------------------------------------------
// registration

fn string_prop() -> Value {
    json!({ "type": "string" })
}

async fn register_with_aliases(
    registry: &ToolRegistry,
    schema: ToolSchema,
    aliases: &[&str],
    workspace_root: &str,
    f: fn(&str, &str, String, Value) -> ToolResult,
) {
    let mut names = vec![schema.name.clone()];
    names.extend(aliases.iter().map(|a| a.to_string()));
    for alias in names {
        let mut aliased = schema.clone();
        aliased.name = alias.clone();
        let root = workspace_root.to_string();
        registry
            .register_tool(
                aliased,
                sync_handler(move |id, args| f(&root, &alias, id, args)),
            )
            .await;
    }
}

pub async fn register_fs_tools(registry: &ToolRegistry, workspace_root: &str) {
    let workspace_root = if workspace_root.is_empty() {
        std::env::current_dir()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default()
    } else {
        weakly_canonical(Path::new(workspace_root))
            .to_string_lossy()
            .into_owned()
    };

    register_with_aliases(
        registry,
        ToolSchema {
            name: "read".into(),
            description: "Read a text file.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "filePath": string_prop(),
                    "offset": { "type": "integer" },
                    "limit": { "type": "integer" },
                },
                "required": ["filePath"],
            }),
        },
        &["readFile", "read_file"],
        &workspace_root,
        read_file,
    )
    .await;

    register_with_aliases(
        registry,
        ToolSchema {
            name: "write".into(),
            description: "Write text content to a file.".into(),
            parameters: json!({
                "type": "object",
                "properties": { "content": string_prop(), "filePath": string_prop() },
                "required": ["content", "filePath"],
            }),
        },
        &["writeFile"],
        &workspace_root,
        write_file,
    )
    .await;

    register_with_aliases(
        registry,
        ToolSchema {
            name: "edit".into(),
            description: "Edit a file by replacing a string.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "filePath": string_prop(),
                    "oldString": string_prop(),
                    "newString": string_prop(),
                    "replaceAll": { "type": "boolean" },
                },
                "required": ["filePath", "oldString", "newString"],
            }),
        },
        &["editFile"],
        &workspace_root,
        edit_file,
    )
    .await;

    register_with_aliases(
        registry,
        ToolSchema {
            name: "glob".into(),
            description: "Match files using a glob pattern.".into(),
            parameters: json!({
                "type": "object",
                "properties": { "pattern": string_prop(), "path": string_prop() },
                "required": ["pattern"],
            }),
        },
        &[],
        &workspace_root,
        glob_files,
    )
    .await;

    register_with_aliases(
        registry,
        ToolSchema {
            name: "grep".into(),
            description: "Search file contents using a regex pattern.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "pattern": string_prop(),
                    "path": string_prop(),
                    "include": string_prop(),
                },
                "required": ["pattern"],
            }),
        },
        &[],
        &workspace_root,
        grep_files,
    )
    .await;

    register_with_aliases(
        registry,
        ToolSchema {
            name: "list".into(),
            description: "List files under a directory.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": string_prop(),
                    "ignore": { "type": "array", "items": { "type": "string" } },
                },
                "required": [],
            }),
        },
        &[],
        &workspace_root,
        list_files,
    )
    .await;
}
