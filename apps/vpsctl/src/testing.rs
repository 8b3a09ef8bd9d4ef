//! Scripted [`Host`] used by the installer tests.

use anyhow::{bail, Result};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use crate::host::{CommandSpec, Host};
use crate::utils::CommandResult;

type Effect = Box<dyn Fn(&CommandSpec)>;

struct Rule {
    pattern: String,
    returncode: i32,
    stdout: String,
    effect: Option<Effect>,
}

pub struct FakeHost {
    euid: u32,
    programs: BTreeSet<String>,
    rules: Vec<Rule>,
    payloads: BTreeMap<String, Vec<u8>>,
    failing_urls: BTreeSet<String>,
    answers: RefCell<VecDeque<String>>,
    commands: RefCell<Vec<CommandSpec>>,
    downloads: RefCell<Vec<String>>,
    prompts: RefCell<Vec<String>>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self {
            euid: 0,
            programs: BTreeSet::new(),
            rules: Vec::new(),
            payloads: BTreeMap::new(),
            failing_urls: BTreeSet::new(),
            answers: RefCell::new(VecDeque::new()),
            commands: RefCell::new(Vec::new()),
            downloads: RefCell::new(Vec::new()),
            prompts: RefCell::new(Vec::new()),
        }
    }

    pub fn with_euid(mut self, euid: u32) -> Self {
        self.euid = euid;
        self
    }

    pub fn with_program(mut self, name: &str) -> Self {
        self.programs.insert(name.to_string());
        self
    }

    fn push_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Commands whose display contains `pattern` exit with `code`.
    pub fn on_exit(self, pattern: &str, code: i32) -> Self {
        self.push_rule(Rule {
            pattern: pattern.to_string(),
            returncode: code,
            stdout: String::new(),
            effect: None,
        })
    }

    pub fn on_stdout(self, pattern: &str, stdout: &str) -> Self {
        self.push_rule(Rule {
            pattern: pattern.to_string(),
            returncode: 0,
            stdout: stdout.to_string(),
            effect: None,
        })
    }

    pub fn on_effect(self, pattern: &str, effect: impl Fn(&CommandSpec) + 'static) -> Self {
        self.push_rule(Rule {
            pattern: pattern.to_string(),
            returncode: 0,
            stdout: String::new(),
            effect: Some(Box::new(effect)),
        })
    }

    pub fn serve(mut self, url: &str, body: &[u8]) -> Self {
        self.payloads.insert(url.to_string(), body.to_vec());
        self
    }

    pub fn fail_url(mut self, url: &str) -> Self {
        self.failing_urls.insert(url.to_string());
        self
    }

    pub fn answer(self, line: &str) -> Self {
        self.answers.borrow_mut().push_back(line.to_string());
        self
    }

    pub fn commands(&self) -> Vec<CommandSpec> {
        self.commands.borrow().clone()
    }

    pub fn command_lines(&self) -> Vec<String> {
        self.commands.borrow().iter().map(CommandSpec::display).collect()
    }

    pub fn ran(&self, pattern: &str) -> bool {
        self.commands
            .borrow()
            .iter()
            .any(|spec| spec.display().contains(pattern))
    }

    pub fn count(&self, pattern: &str) -> usize {
        self.commands
            .borrow()
            .iter()
            .filter(|spec| spec.display().contains(pattern))
            .count()
    }

    pub fn downloads(&self) -> Vec<String> {
        self.downloads.borrow().clone()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }
}

impl Host for FakeHost {
    fn run(&self, spec: &CommandSpec) -> Result<CommandResult> {
        self.commands.borrow_mut().push(spec.clone());
        let display = spec.display();

        let mut returncode = 0;
        let mut stdout = String::new();
        if let Some(rule) = self.rules.iter().find(|rule| display.contains(&rule.pattern)) {
            returncode = rule.returncode;
            stdout = rule.stdout.clone();
            if let Some(effect) = &rule.effect {
                effect(spec);
            }
        }

        Ok(CommandResult {
            command: display,
            ok: spec.ok_codes.contains(&returncode),
            stdout,
            stderr: String::new(),
            returncode,
        })
    }

    fn which(&self, program: &str) -> Option<PathBuf> {
        self.programs
            .contains(program)
            .then(|| Path::new("/usr/bin").join(program))
    }

    fn download(&self, url: &str, dest: &Path) -> Result<()> {
        self.downloads.borrow_mut().push(url.to_string());
        if self.failing_urls.contains(url) {
            bail!("Download failed for {url} (404 Not Found)");
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let body = self
            .payloads
            .get(url)
            .cloned()
            .unwrap_or_else(|| format!("payload from {url}").into_bytes());
        fs::write(dest, body)?;
        Ok(())
    }

    fn effective_uid(&self) -> u32 {
        self.euid
    }

    fn prompt(&self, message: &str) -> Result<String> {
        self.prompts.borrow_mut().push(message.to_string());
        Ok(self
            .answers
            .borrow_mut()
            .pop_front()
            .unwrap_or_default()
            .trim()
            .to_string())
    }
}

/// Builds an in-memory zip archive, the way release archives ship the node core.
pub fn zip_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
    use std::io::Write;

    let mut buffer = std::io::Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut buffer);
        let options = zip::write::FileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .unix_permissions(0o755);
        for (name, contents) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(contents).unwrap();
        }
        zip.finish().unwrap();
    }
    buffer.into_inner()
}
