use crate::lexer::Token;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Optional `1`/`2` descriptor followed by `>` or `>>`.
static REDIRECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([12]?)(>>?)").expect("redirect pattern compiles"));

/// Kind of redirection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectMode {
    Truncate,
    Append,
}

/// Where one output stream goes, already anchored at the working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectTarget {
    pub path: PathBuf,
    pub mode: RedirectMode,
}

/// Redirections declared on a single stage. `None` means the stream is inherited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Redirections {
    pub stdout: Option<RedirectTarget>,
    pub stderr: Option<RedirectTarget>,
}

/// One command of a pipeline. `argv` is never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandStage {
    pub argv: Vec<String>,
    pub redirects: Redirections,
}

impl CommandStage {
    pub fn name(&self) -> &str {
        &self.argv[0]
    }

    pub fn args(&self) -> &[String] {
        &self.argv[1..]
    }
}

/// A non-empty list of stages connected by `|`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    pub stages: Vec<CommandStage>,
}

impl Pipeline {
    pub fn last(&self) -> &CommandStage {
        &self.stages[self.stages.len() - 1]
    }
}

enum Stream {
    Stdout,
    Stderr,
}

/// Recognize an operator spelled by the unquoted start of a word. The third
/// element is the fused target, if the word carries one.
fn match_operator(token: &Token) -> Option<(Stream, RedirectMode, Option<String>)> {
    let caps = REDIRECT_RE.captures(token.unquoted_prefix())?;
    let rest = &token.text()[caps[0].len()..];
    let stream = match &caps[1] {
        "2" => Stream::Stderr,
        _ => Stream::Stdout,
    };
    let mode = match &caps[2] {
        ">>" => RedirectMode::Append,
        _ => RedirectMode::Truncate,
    };
    // `>''` names an empty target rather than borrowing the next word.
    let inline = (!rest.is_empty() || !token.is_bare_word()).then(|| rest.to_string());
    Some((stream, mode, inline))
}

/// Pull redirection operators and their targets out of a stage's tokens.
///
/// Accepts `>`, `1>`, `>>`, `1>>`, `2>` and `2>>`, either standalone with the
/// target in the next token or fused with the target (`2>err.log`). Targets are
/// joined onto `cwd` unless absolute. An operator with no target left is dropped.
/// Everything else passes through in order.
pub fn extract_redirections(tokens: Vec<Token>, cwd: &Path) -> (Vec<Token>, Redirections) {
    let mut clean = Vec::with_capacity(tokens.len());
    let mut redirects = Redirections::default();
    let mut iter = tokens.into_iter();

    while let Some(token) = iter.next() {
        let Some((stream, mode, inline)) = match_operator(&token) else {
            clean.push(token);
            continue;
        };
        let target = match inline {
            Some(inline) => inline,
            None => match iter.next() {
                Some(next) => next.text().to_string(),
                None => {
                    log::debug!("redirection `{}` has no target, ignoring", token.text());
                    continue;
                }
            },
        };
        let target = Some(RedirectTarget {
            path: cwd.join(target),
            mode,
        });
        match stream {
            Stream::Stdout => redirects.stdout = target,
            Stream::Stderr => redirects.stderr = target,
        }
    }

    (clean, redirects)
}

/// Split tokens on `|` and build a pipeline, dropping stages that end up empty.
///
/// Returns `None` when nothing runnable is left.
pub fn parse_pipeline(tokens: Vec<Token>, cwd: &Path) -> Option<Pipeline> {
    let mut stages = Vec::new();
    let mut segment = Vec::new();
    let mut tokens = tokens.into_iter().peekable();

    while let Some(token) = tokens.next() {
        let at_end = tokens.peek().is_none();
        match token {
            Token::PipeOp => push_stage(&mut stages, std::mem::take(&mut segment), cwd),
            word => segment.push(word),
        }
        if at_end {
            push_stage(&mut stages, std::mem::take(&mut segment), cwd);
        }
    }

    if stages.is_empty() {
        None
    } else {
        Some(Pipeline { stages })
    }
}

fn push_stage(stages: &mut Vec<CommandStage>, segment: Vec<Token>, cwd: &Path) {
    let (clean, redirects) = extract_redirections(segment, cwd);
    if clean.is_empty() {
        return;
    }
    stages.push(CommandStage {
        argv: clean.iter().map(|t| t.text().to_string()).collect(),
        redirects,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn cwd() -> PathBuf {
        PathBuf::from("/work")
    }

    fn extract(line: &str) -> (Vec<String>, Redirections) {
        let (clean, redirects) = extract_redirections(tokenize(line), &cwd());
        (
            clean.iter().map(|t| t.text().to_string()).collect(),
            redirects,
        )
    }

    fn target(path: &str, mode: RedirectMode) -> Option<RedirectTarget> {
        Some(RedirectTarget {
            path: PathBuf::from(path),
            mode,
        })
    }

    #[test]
    fn test_standalone_stdout_truncate() {
        let (argv, r) = extract("echo hi > out.txt");
        assert_eq!(argv, vec!["echo", "hi"]);
        assert_eq!(r.stdout, target("/work/out.txt", RedirectMode::Truncate));
        assert_eq!(r.stderr, None);
    }

    #[test]
    fn test_explicit_descriptor_and_append() {
        let (argv, r) = extract("ls 1>> log 2> /tmp/err");
        assert_eq!(argv, vec!["ls"]);
        assert_eq!(r.stdout, target("/work/log", RedirectMode::Append));
        assert_eq!(r.stderr, target("/tmp/err", RedirectMode::Truncate));
    }

    #[test]
    fn test_fused_targets() {
        let (argv, r) = extract("cmd a >out 2>>err b");
        assert_eq!(argv, vec!["cmd", "a", "b"]);
        assert_eq!(r.stdout, target("/work/out", RedirectMode::Truncate));
        assert_eq!(r.stderr, target("/work/err", RedirectMode::Append));
    }

    #[test]
    fn test_quoted_operator_is_plain_argument() {
        let (argv, r) = extract("echo '>' x");
        assert_eq!(argv, vec!["echo", ">", "x"]);
        assert_eq!(r, Redirections::default());
    }

    #[test]
    fn test_escaped_operator_is_plain_argument() {
        let (argv, r) = extract(r"echo \> x");
        assert_eq!(argv, vec!["echo", ">", "x"]);
        assert_eq!(r, Redirections::default());
    }

    #[test]
    fn test_fused_quoted_targets() {
        let (argv, r) = extract(r#"cmd a >'out.txt' 2>"e f" b"#);
        assert_eq!(argv, vec!["cmd", "a", "b"]);
        assert_eq!(r.stdout, target("/work/out.txt", RedirectMode::Truncate));
        assert_eq!(r.stderr, target("/work/e f", RedirectMode::Truncate));

        let (argv, r) = extract(r#"echo hi 1>>"my file" >'>x'"#);
        assert_eq!(argv, vec!["echo", "hi"]);
        assert_eq!(r.stdout, target("/work/>x", RedirectMode::Truncate));
    }

    #[test]
    fn test_quote_inside_descriptor_is_plain_argument() {
        let (argv, r) = extract("echo 2'>'x");
        assert_eq!(argv, vec!["echo", "2>x"]);
        assert_eq!(r, Redirections::default());
    }

    #[test]
    fn test_operator_without_target_is_dropped() {
        let (argv, r) = extract("echo hi >");
        assert_eq!(argv, vec!["echo", "hi"]);
        assert_eq!(r, Redirections::default());
    }

    #[test]
    fn test_quoted_target_with_spaces() {
        let (_, r) = extract("echo hi > 'my file'");
        assert_eq!(r.stdout, target("/work/my file", RedirectMode::Truncate));
    }

    #[test]
    fn test_pipeline_split_and_per_stage_redirects() {
        let p = parse_pipeline(tokenize("cat a 2>e | sort > sorted"), &cwd()).unwrap();
        assert_eq!(p.stages.len(), 2);
        assert_eq!(p.stages[0].argv, vec!["cat", "a"]);
        assert_eq!(p.stages[0].redirects.stderr, target("/work/e", RedirectMode::Truncate));
        assert_eq!(p.last().name(), "sort");
        assert_eq!(p.last().redirects.stdout, target("/work/sorted", RedirectMode::Truncate));
    }

    #[test]
    fn test_empty_stages_are_dropped() {
        let p = parse_pipeline(tokenize("| echo a || > x | wc"), &cwd()).unwrap();
        let names: Vec<_> = p.stages.iter().map(CommandStage::name).collect();
        assert_eq!(names, vec!["echo", "wc"]);
    }

    #[test]
    fn test_nothing_to_run() {
        assert_eq!(parse_pipeline(tokenize("   "), &cwd()), None);
        assert_eq!(parse_pipeline(tokenize(" | "), &cwd()), None);
    }
}
