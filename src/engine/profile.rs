use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use anyhow::{Result, bail};
use regex::Regex;
use serde::Deserialize;

/// Placeholder for the source file name inside command templates
pub const INPUT_PLACEHOLDER: &str = "%INPUT%";
/// Placeholder for the compiled artifact name
pub const OUTPUT_PLACEHOLDER: &str = "%OUTPUT%";
/// Placeholder for the source file name without its extension
pub const STEM_PLACEHOLDER: &str = "%STEM%";

/// Name of the artifact produced by a compile stage
pub const ARTIFACT_NAME: &str = "main";

/// How the submission is executed
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProfileKind {
    /// Evaluated inside an embedded interpreter, no external process
    Sandboxed,
    /// Compiled and/or run by an external toolchain
    Toolchain,
}

/// How the source file inside the workspace is named
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceName {
    Fixed {
        file_name: String,
    },
    /// Named after the first public type declared in the source, e.g. `Solution.java`
    PublicType {
        extension: String,
        fallback: String,
    },
}

impl Default for SourceName {
    fn default() -> Self {
        Self::Fixed {
            file_name: "main".to_string(),
        }
    }
}

impl SourceName {
    /// Resolves the file name for the given submission
    pub fn resolve(&self, code: &str) -> String {
        match self {
            Self::Fixed { file_name } => file_name.clone(),
            Self::PublicType {
                extension,
                fallback,
            } => {
                let stem = find_public_type(code).unwrap_or_else(|| fallback.clone());
                format!("{stem}.{extension}")
            }
        }
    }
}

/// One row of the language table
#[derive(Deserialize, Debug, Clone)]
pub struct LanguageProfile {
    /// Canonical identifier, lower case
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub kind: ProfileKind,
    #[serde(default)]
    pub source: SourceName,
    #[serde(default)]
    pub compile: Option<Vec<String>>,
    #[serde(default)]
    pub run: Vec<String>,
    #[serde(default)]
    pub probe: Vec<String>,
}

impl LanguageProfile {
    pub fn needs_compilation(&self) -> bool {
        self.compile.is_some()
    }

    pub fn is_sandboxed(&self) -> bool {
        self.kind == ProfileKind::Sandboxed
    }

    fn matches(&self, id: &str) -> bool {
        self.name.eq_ignore_ascii_case(id) || self.aliases.iter().any(|a| a.eq_ignore_ascii_case(id))
    }

    fn toolchain(
        name: &str,
        aliases: &[&str],
        source: SourceName,
        compile: &[&str],
        run: &[&str],
        probe: &[&str],
    ) -> Self {
        let owned = |parts: &[&str]| parts.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            name: name.to_string(),
            aliases: owned(aliases),
            kind: ProfileKind::Toolchain,
            source,
            compile: (!compile.is_empty()).then(|| owned(compile)),
            run: owned(run),
            probe: owned(probe),
        }
    }
}

fn fixed(file_name: &str) -> SourceName {
    SourceName::Fixed {
        file_name: file_name.to_string(),
    }
}

/// Read-only table of every language the engine knows about
#[derive(Debug, Clone)]
pub struct LanguageTable {
    profiles: Vec<LanguageProfile>,
}

impl LanguageTable {
    /// Builds a table from configured profiles, rejecting rows that cannot be executed
    pub fn new(profiles: Vec<LanguageProfile>) -> Result<Self> {
        let mut seen = HashSet::new();
        for profile in &profiles {
            if profile.name.is_empty() {
                bail!("Language profile with an empty name");
            }
            for id in std::iter::once(&profile.name).chain(&profile.aliases) {
                if !seen.insert(id.to_ascii_lowercase()) {
                    bail!("Language identifier '{id}' is declared twice");
                }
            }
            if profile.kind == ProfileKind::Toolchain {
                if profile.run.is_empty() {
                    bail!("Language '{}' has no run command", profile.name);
                }
                if profile.probe.is_empty() {
                    bail!("Language '{}' has no probe command", profile.name);
                }
                if profile.compile.as_ref().is_some_and(|c| c.is_empty()) {
                    bail!("Language '{}' has an empty compile command", profile.name);
                }
            }
        }

        Ok(Self { profiles })
    }

    /// The table used when the configuration does not provide one
    pub fn builtin() -> Self {
        let profiles = vec![
            LanguageProfile {
                name: "javascript".to_string(),
                aliases: vec!["js".to_string()],
                kind: ProfileKind::Sandboxed,
                source: SourceName::default(),
                compile: None,
                run: Vec::new(),
                probe: Vec::new(),
            },
            LanguageProfile::toolchain(
                "python",
                &["py", "python3"],
                fixed("main.py"),
                &[],
                &["python3", "%INPUT%"],
                &["python3", "--version"],
            ),
            LanguageProfile::toolchain(
                "shell",
                &["sh"],
                fixed("main.sh"),
                &[],
                &["sh", "%INPUT%"],
                &["sh", "-c", "exit 0"],
            ),
            LanguageProfile::toolchain(
                "c",
                &[],
                fixed("main.c"),
                &["gcc", "-O2", "-o", "%OUTPUT%", "%INPUT%"],
                &["./%OUTPUT%"],
                &["gcc", "--version"],
            ),
            LanguageProfile::toolchain(
                "cpp",
                &["c++", "cxx"],
                fixed("main.cpp"),
                &["g++", "-O2", "-std=c++17", "-o", "%OUTPUT%", "%INPUT%"],
                &["./%OUTPUT%"],
                &["g++", "--version"],
            ),
            LanguageProfile::toolchain(
                "rust",
                &["rs"],
                fixed("main.rs"),
                &["rustc", "-O", "-o", "%OUTPUT%", "%INPUT%"],
                &["./%OUTPUT%"],
                &["rustc", "--version"],
            ),
            LanguageProfile::toolchain(
                "go",
                &["golang"],
                fixed("main.go"),
                &["go", "build", "-o", "%OUTPUT%", "%INPUT%"],
                &["./%OUTPUT%"],
                &["go", "version"],
            ),
            LanguageProfile::toolchain(
                "java",
                &[],
                SourceName::PublicType {
                    extension: "java".to_string(),
                    fallback: "Main".to_string(),
                },
                &["javac", "%INPUT%"],
                &["java", "-cp", ".", "%STEM%"],
                &["javac", "-version"],
            ),
        ];

        Self { profiles }
    }

    /// Case-insensitive lookup by name or alias
    pub fn lookup(&self, id: &str) -> Option<&LanguageProfile> {
        let id = id.trim();
        self.profiles.iter().find(|p| p.matches(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &LanguageProfile> {
        self.profiles.iter()
    }
}

/// Replaces the template placeholders in every argument of a command
pub fn apply_template(template: &[String], source_file: &str) -> Vec<String> {
    let stem = source_file
        .rsplit_once('.')
        .map_or(source_file, |(stem, _)| stem);
    let mut mapping = HashMap::<&str, &str>::new();
    mapping.insert(INPUT_PLACEHOLDER, source_file);
    mapping.insert(OUTPUT_PLACEHOLDER, ARTIFACT_NAME);
    mapping.insert(STEM_PLACEHOLDER, stem);

    template
        .iter()
        .map(|s| {
            let mut t = s.clone();
            for (k, v) in mapping.iter() {
                t = t.replace(k, v);
            }
            t
        })
        .collect()
}

static PUBLIC_TYPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\bpublic\s+(?:(?:abstract|final|sealed|non-sealed|static|strictfp)\s+)*(?:class|interface|enum|record|@interface)\s+([A-Za-z_$][A-Za-z0-9_$]*)",
    )
    .expect("public type pattern is valid")
});

/// Finds the name of the first public top-level type declared in the source
pub fn find_public_type(code: &str) -> Option<String> {
    let stripped = strip_comments_and_literals(code);
    PUBLIC_TYPE
        .captures_iter(&stripped)
        .find(|caps| caps.get(0).is_some_and(|m| brace_depth(&stripped[..m.start()]) == 0))
        .map(|caps| caps[1].to_string())
}

/// Nesting level at the end of `prefix`, which must already be stripped
fn brace_depth(prefix: &str) -> i64 {
    prefix.chars().fold(0, |depth, c| match c {
        '{' => depth + 1,
        '}' => depth - 1,
        _ => depth,
    })
}

/// Blanks out comments and string/char literals so that only declarations remain
fn strip_comments_and_literals(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '/' if chars.peek() == Some(&'/') => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                    }
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
                out.push(' ');
            }
            '"' | '\'' => {
                let quote = c;
                let mut escaped = false;
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        if quote == '\'' {
                            break;
                        }
                    }
                    if escaped {
                        escaped = false;
                    } else if c == '\\' {
                        escaped = true;
                    } else if c == quote {
                        break;
                    }
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let table = LanguageTable::builtin();
        assert_eq!(table.lookup("JavaScript").unwrap().name, "javascript");
        assert_eq!(table.lookup("PY").unwrap().name, "python");
        assert_eq!(table.lookup(" c++ ").unwrap().name, "cpp");
        assert!(table.lookup("cobol").is_none());
        assert!(table.lookup("").is_none());
    }

    #[test]
    fn test_builtin_table_is_valid() {
        let builtin = LanguageTable::builtin();
        let profiles: Vec<_> = builtin.iter().cloned().collect();
        assert!(LanguageTable::new(profiles).is_ok());
        assert_eq!(builtin.iter().filter(|p| p.is_sandboxed()).count(), 1);
        assert!(builtin.lookup("java").unwrap().needs_compilation());
        assert!(!builtin.lookup("python").unwrap().needs_compilation());
    }

    #[test]
    fn test_duplicate_identifiers_are_rejected() {
        let python = LanguageTable::builtin().lookup("python").unwrap().clone();
        let mut clash = python.clone();
        clash.name = "snake".to_string();
        clash.aliases = vec!["PY".to_string()];
        assert!(LanguageTable::new(vec![python, clash]).is_err());
    }

    #[test]
    fn test_toolchain_without_run_is_rejected() {
        let mut broken = LanguageTable::builtin().lookup("c").unwrap().clone();
        broken.run.clear();
        assert!(LanguageTable::new(vec![broken]).is_err());
    }

    #[test]
    fn test_apply_template() {
        let template = vec![
            "java".to_string(),
            "-cp".to_string(),
            ".".to_string(),
            "%STEM%".to_string(),
        ];
        assert_eq!(
            apply_template(&template, "Solution.java"),
            vec!["java", "-cp", ".", "Solution"]
        );

        let template = vec!["gcc".to_string(), "-o".to_string(), "%OUTPUT%".to_string(), "%INPUT%".to_string()];
        assert_eq!(apply_template(&template, "main.c"), vec!["gcc", "-o", "main", "main.c"]);
    }

    #[test]
    fn test_find_public_type() {
        let code = r#"
            import java.util.*;

            public final class Solution {
                public static void main(String[] args) {}
            }
        "#;
        assert_eq!(find_public_type(code), Some("Solution".to_string()));
        assert_eq!(
            find_public_type("public record Point(int x, int y) {}"),
            Some("Point".to_string())
        );
        assert_eq!(find_public_type("class Hidden {}"), None);
    }

    #[test]
    fn test_find_public_type_ignores_comments_and_strings() {
        let code = r#"
            // public class Commented {}
            /* public class Blocked {} */
            class Main {
                String s = "public class Quoted {}";
                char c = '"';
            }
            public class Real {}
        "#;
        assert_eq!(find_public_type(code), Some("Real".to_string()));
    }

    #[test]
    fn test_find_public_type_skips_nested_types() {
        let code = r#"
            class Main {
                public static class Node {
                    int value;
                }

                public static void main(String[] args) {
                    System.out.println(new Node().value);
                }
            }
        "#;
        assert_eq!(find_public_type(code), None);

        let code = r#"
            class Helper {
                public interface Visitor {}
            }
            public class Solution {
                public static class Inner {}
            }
        "#;
        assert_eq!(find_public_type(code), Some("Solution".to_string()));
    }

    #[test]
    fn test_source_name_falls_back() {
        let source = SourceName::PublicType {
            extension: "java".to_string(),
            fallback: "Main".to_string(),
        };
        assert_eq!(source.resolve("class A {}"), "Main.java");
        assert_eq!(source.resolve("public class Hello {}"), "Hello.java");
        assert_eq!(fixed("main.py").resolve("anything"), "main.py");
    }
}
