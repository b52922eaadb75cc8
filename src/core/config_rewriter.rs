use crate::config::PortshiftConfig;
use crate::domain::ports::{command_line, CommandRunner};
use crate::utils::error::{PortshiftError, Result};
use regex::Regex;
use std::borrow::Cow;
use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A line-pattern substitution anchored on the literal pre-change text, so a file that
/// was already rewritten no longer matches.
#[derive(Debug, Clone)]
pub struct RewriteRule {
    pattern: Regex,
    replacement: String,
    description: String,
    /// Match only the part of each line before a `#` comment.
    code_only: bool,
}

impl RewriteRule {
    /// Moves nginx `listen` directives from `from` to `to`.
    ///
    /// Handles `listen 443 ssl;`, `listen [::]:443 ssl http2;` and
    /// `listen 10.0.0.1:443 default_server;`, at the start of a line or after `;`, `{`
    /// or `}` on the same line. Anything after a `#` is left alone.
    pub fn relocate_listen(from: u16, to: u16) -> Result<Self> {
        let pattern = Regex::new(&format!(
            r"((?:^|[;{{}}])[ \t]*listen[ \t]+(?:\[[0-9A-Fa-f:.]*\]:|[^\s;:\[]+:)?){}\b",
            from
        ))?;
        Ok(Self {
            pattern,
            replacement: format!("${{1}}{}", to),
            description: format!("listen {} -> {}", from, to),
            code_only: true,
        })
    }

    /// Plain text substitution; `from` is matched literally.
    pub fn literal(from: &str, to: &str) -> Result<Self> {
        Ok(Self {
            pattern: Regex::new(&regex::escape(from))?,
            replacement: to.replace('$', "$$"),
            description: format!("'{}' -> '{}'", from, to),
            code_only: false,
        })
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn apply<'t>(&self, text: &'t str) -> (Cow<'t, str>, usize) {
        if !self.code_only {
            let count = self.pattern.find_iter(text).count();
            if count == 0 {
                return (Cow::Borrowed(text), 0);
            }
            return (self.pattern.replace_all(text, self.replacement.as_str()), count);
        }

        let mut out = String::with_capacity(text.len());
        let mut count = 0;
        for line in text.split_inclusive('\n') {
            let (code, comment) = line.split_at(line.find('#').unwrap_or(line.len()));
            let matches = self.pattern.find_iter(code).count();
            if matches > 0 {
                count += matches;
                out.push_str(&self.pattern.replace_all(code, self.replacement.as_str()));
            } else {
                out.push_str(code);
            }
            out.push_str(comment);
        }

        if count == 0 {
            (Cow::Borrowed(text), 0)
        } else {
            (Cow::Owned(out), count)
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileChange {
    pub path: PathBuf,
    pub replacements: usize,
    original: String,
    rewritten: String,
}

#[derive(Debug, Clone, Default)]
pub struct RewriteOutcome {
    pub files_scanned: usize,
    pub changes: Vec<FileChange>,
}

impl RewriteOutcome {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn changed_files(&self) -> Vec<PathBuf> {
        self.changes.iter().map(|c| c.path.clone()).collect()
    }

    pub fn total_replacements(&self) -> usize {
        self.changes.iter().map(|c| c.replacements).sum()
    }

    /// Writes back every file's pre-rewrite content.
    pub fn restore(&self) -> Result<()> {
        for change in &self.changes {
            fs::write(&change.path, &change.original)?;
            tracing::info!("↩️ Restored {}", change.path.display());
        }
        Ok(())
    }
}

pub struct ConfigRewriter {
    rules: Vec<RewriteRule>,
}

impl ConfigRewriter {
    pub fn new(rules: Vec<RewriteRule>) -> Self {
        Self { rules }
    }

    /// The listen relocation followed by any configured literal rules.
    pub fn from_config(config: &PortshiftConfig) -> Result<Self> {
        let mut rules = vec![RewriteRule::relocate_listen(
            config.ports.public,
            config.ports.relocated,
        )?];
        for rule in &config.proxy.extra_rules {
            rules.push(RewriteRule::literal(&rule.from, &rule.to)?);
        }
        Ok(Self::new(rules))
    }

    pub fn rules(&self) -> &[RewriteRule] {
        &self.rules
    }

    pub fn rewrite_text(&self, text: &str) -> (String, usize) {
        let mut current = text.to_string();
        let mut total = 0;
        for rule in &self.rules {
            let (next, count) = rule.apply(&current);
            if count > 0 {
                total += count;
                current = next.into_owned();
            }
        }
        (current, total)
    }

    /// Computes what `rewrite` would change without touching disk.
    pub fn preview(&self, dirs: &[PathBuf]) -> Result<RewriteOutcome> {
        let mut outcome = RewriteOutcome::default();

        for path in collect_files(dirs)? {
            let original = match fs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) if e.kind() == ErrorKind::InvalidData => {
                    tracing::debug!("skipping non-text file {}", path.display());
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            outcome.files_scanned += 1;

            let (rewritten, replacements) = self.rewrite_text(&original);
            if replacements > 0 {
                outcome.changes.push(FileChange {
                    path,
                    replacements,
                    original,
                    rewritten,
                });
            }
        }

        Ok(outcome)
    }

    /// Applies every rule to every regular file under `dirs`, recursively.
    /// A failed write restores the files already written before returning the error.
    pub fn rewrite(&self, dirs: &[PathBuf]) -> Result<RewriteOutcome> {
        let outcome = self.preview(dirs)?;

        for (idx, change) in outcome.changes.iter().enumerate() {
            if let Err(e) = fs::write(&change.path, &change.rewritten) {
                let written = RewriteOutcome {
                    files_scanned: outcome.files_scanned,
                    changes: outcome.changes[..idx].to_vec(),
                };
                if let Err(restore_err) = written.restore() {
                    tracing::error!("❌ Could not restore after failed write: {}", restore_err);
                }
                return Err(e.into());
            }
            tracing::info!(
                "✏️ Rewrote {} ({} replacement(s))",
                change.path.display(),
                change.replacements
            );
        }

        Ok(outcome)
    }
}

/// Regular files under each directory, symlinks followed, each real file once.
fn collect_files(dirs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut seen = HashSet::new();
    for dir in dirs {
        if !dir.is_dir() {
            tracing::info!("📁 {} does not exist, skipping", dir.display());
            continue;
        }
        walk(dir, &mut files, &mut seen)?;
    }
    Ok(files)
}

fn walk(dir: &Path, files: &mut Vec<PathBuf>, seen: &mut HashSet<PathBuf>) -> Result<()> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    entries.sort();

    for path in entries {
        // dangling symlinks fail here
        let metadata = match fs::metadata(&path) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!("skipping {}: {}", path.display(), e);
                continue;
            }
        };
        let canonical = fs::canonicalize(&path)?;
        if !seen.insert(canonical.clone()) {
            continue;
        }
        if metadata.is_dir() {
            walk(&path, files, seen)?;
        } else if metadata.is_file() {
            files.push(canonical);
        }
    }
    Ok(())
}

/// Runs the proxy's own syntax check (`nginx -t` by default).
pub struct SyntaxCheck<R: CommandRunner> {
    runner: Arc<R>,
    program: String,
    args: Vec<String>,
}

impl<R: CommandRunner> SyntaxCheck<R> {
    pub fn new(runner: Arc<R>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            runner,
            program: program.into(),
            args,
        }
    }

    pub fn command(&self) -> String {
        let args: Vec<&str> = self.args.iter().map(String::as_str).collect();
        command_line(&self.program, &args)
    }

    /// A check that cannot run counts as failed.
    pub async fn check(&self) -> Result<()> {
        let args: Vec<&str> = self.args.iter().map(String::as_str).collect();
        match self.runner.run(&self.program, &args).await {
            Ok(out) if out.success() => {
                tracing::info!("✅ {} passed", self.command());
                Ok(())
            }
            Ok(out) => Err(PortshiftError::ValidationFailed {
                command: self.command(),
                output: format!("{}{}", out.stderr.trim(), out.stdout.trim()),
            }),
            Err(e) => Err(PortshiftError::ValidationFailed {
                command: self.command(),
                output: e.to_string(),
            }),
        }
    }
}
