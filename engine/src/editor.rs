//! External diff editors used by the modify flow.

use std::fmt;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::process::Stdio;
use std::str::FromStr;

use tokio::process::Command;
use tracing::debug;

use crate::modify::ModifyError;

/// Editor session future.
pub type EditorFut<'a> = Pin<Box<dyn Future<Output = Result<(), ModifyError>> + Send + 'a>>;

/// Editors that can show two files side by side and save the right-hand one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorType {
    VsCode,
    Vim,
    Neovim,
    Emacs,
    /// Any other program, invoked as `program <old> <new>`.
    Custom(String),
}

impl EditorType {
    /// Program and arguments that open `old` against `new`.
    #[must_use]
    pub fn diff_command(&self, old: &Path, new: &Path) -> (String, Vec<String>) {
        let old = old.display().to_string();
        let new = new.display().to_string();
        match self {
            Self::VsCode => (
                "code".to_string(),
                vec!["--wait".into(), "--diff".into(), old, new],
            ),
            Self::Vim => ("vim".to_string(), vec!["-d".into(), old, new]),
            Self::Neovim => ("nvim".to_string(), vec!["-d".into(), old, new]),
            Self::Emacs => (
                "emacs".to_string(),
                vec![
                    "--eval".into(),
                    format!("(ediff {} {})", lisp_string(&old), lisp_string(&new)),
                ],
            ),
            Self::Custom(program) => (program.clone(), vec![old, new]),
        }
    }
}

fn lisp_string(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

impl FromStr for EditorType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            "code" | "vscode" => Self::VsCode,
            "vim" | "vi" => Self::Vim,
            "nvim" | "neovim" => Self::Neovim,
            "emacs" => Self::Emacs,
            other => Self::Custom(other.to_string()),
        })
    }
}

impl fmt::Display for EditorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VsCode => f.write_str("vscode"),
            Self::Vim => f.write_str("vim"),
            Self::Neovim => f.write_str("neovim"),
            Self::Emacs => f.write_str("emacs"),
            Self::Custom(program) => f.write_str(program),
        }
    }
}

/// Opens a diff of two files and resolves once the user is done editing.
pub trait DiffEditor: Send + Sync {
    fn open_diff<'a>(&'a self, editor: &'a EditorType, old: &'a Path, new: &'a Path)
    -> EditorFut<'a>;
}

/// Launches the editor as a child process attached to the terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessDiffEditor;

impl DiffEditor for ProcessDiffEditor {
    fn open_diff<'a>(
        &'a self,
        editor: &'a EditorType,
        old: &'a Path,
        new: &'a Path,
    ) -> EditorFut<'a> {
        Box::pin(async move {
            let (program, args) = editor.diff_command(old, new);
            debug!(%editor, %program, "opening diff editor");
            let status = Command::new(&program)
                .args(&args)
                .stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .kill_on_drop(true)
                .status()
                .await
                .map_err(|source| ModifyError::EditorLaunch {
                    editor: program.clone(),
                    source,
                })?;
            if status.success() {
                Ok(())
            } else {
                Err(ModifyError::EditorFailed {
                    editor: program,
                    status: status.to_string(),
                })
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{DiffEditor, EditorType, ProcessDiffEditor};
    use crate::modify::ModifyError;
    use std::path::Path;

    #[test]
    fn parses_editor_names() {
        assert_eq!("code".parse::<EditorType>().unwrap(), EditorType::VsCode);
        assert_eq!("nvim".parse::<EditorType>().unwrap(), EditorType::Neovim);
        assert_eq!(
            "meld".parse::<EditorType>().unwrap(),
            EditorType::Custom("meld".into())
        );
    }

    #[test]
    fn diff_commands() {
        let (program, args) = EditorType::Vim.diff_command(Path::new("/a"), Path::new("/b"));
        assert_eq!(program, "vim");
        assert_eq!(args, ["-d", "/a", "/b"]);

        let (program, args) = EditorType::Emacs.diff_command(Path::new("/a"), Path::new("/b"));
        assert_eq!(program, "emacs");
        assert_eq!(args, ["--eval", "(ediff \"/a\" \"/b\")"]);
    }

    #[tokio::test]
    async fn missing_program_is_a_launch_error() {
        let editor = EditorType::Custom("/nonexistent/anvil-editor".into());
        let err = ProcessDiffEditor
            .open_diff(&editor, Path::new("/a"), Path::new("/b"))
            .await
            .unwrap_err();
        assert!(matches!(err, ModifyError::EditorLaunch { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_reported() {
        let editor = EditorType::Custom("false".into());
        let err = ProcessDiffEditor
            .open_diff(&editor, Path::new("/a"), Path::new("/b"))
            .await
            .unwrap_err();
        assert!(matches!(err, ModifyError::EditorFailed { .. }));
    }
}
