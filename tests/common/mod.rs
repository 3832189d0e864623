//! Scratch-repository fixture for integration tests.
//!
//! Builds a working repository with a bare `origin` remote inside a temp
//! directory, using the real `git` binary directly (the code under test
//! drives its own `git`; the fixture must not depend on it).

use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;

pub struct ScratchRepo {
    // Held for its Drop; removing it removes both repositories.
    _root: TempDir,
    pub work: PathBuf,
    pub origin: PathBuf,
}

impl ScratchRepo {
    pub fn new() -> Self {
        let root = tempfile::tempdir().expect("create scratch dir");
        let origin = root.path().join("origin.git");
        let work = root.path().join("work");

        run_git(root.path(), &["init", "--bare", "origin.git"]);
        run_git(root.path(), &["init", "work"]);
        run_git(&work, &["config", "user.name", "Scratch Tester"]);
        run_git(&work, &["config", "user.email", "scratch@example.test"]);
        run_git(
            &work,
            &["remote", "add", "origin", origin.to_str().expect("utf8 path")],
        );

        ScratchRepo {
            _root: root,
            work,
            origin,
        }
    }

    /// Write a file in the working tree.
    pub fn write(&self, name: &str, content: &str) {
        std::fs::write(self.work.join(name), content).expect("write work file");
    }

    pub fn commit_all(&self, message: &str) {
        run_git(&self.work, &["add", "-A"]);
        run_git(&self.work, &["commit", "-m", message]);
    }

    pub fn head(&self) -> String {
        self.git_stdout(&["rev-parse", "HEAD"])
    }

    /// Run git in the work repo and return trimmed stdout.
    pub fn git_stdout(&self, args: &[&str]) -> String {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.work)
            .args(args)
            .output()
            .expect("run git");
        assert!(
            output.status.success(),
            "git {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).trim().to_owned()
    }

    /// Same, against the bare origin repository.
    pub fn origin_git_stdout(&self, args: &[&str]) -> String {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.origin)
            .args(args)
            .output()
            .expect("run git in origin");
        assert!(
            output.status.success(),
            "origin git {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).trim().to_owned()
    }

    /// Run `git mktree -z` feeding `input` and return the tree hash.
    pub fn mktree(&self, input: &str) -> String {
        use std::io::Write;
        use std::process::Stdio;

        let mut child = Command::new("git")
            .arg("-C")
            .arg(&self.work)
            .args(["mktree", "-z"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .expect("spawn mktree");
        child
            .stdin
            .take()
            .expect("mktree stdin")
            .write_all(input.as_bytes())
            .expect("feed mktree");
        let output = child.wait_with_output().expect("wait for mktree");
        assert!(output.status.success(), "mktree failed");
        String::from_utf8_lossy(&output.stdout).trim().to_owned()
    }

    pub fn ref_exists(&self, ref_name: &str) -> bool {
        Command::new("git")
            .arg("-C")
            .arg(&self.work)
            .args(["rev-parse", "--verify", "--quiet", ref_name])
            .output()
            .expect("run git")
            .status
            .success()
    }
}

fn run_git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .output()
        .expect("run git");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}
