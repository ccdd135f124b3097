use crate::command::{CommandRunner, CommandSpec, Output, Verb};
use crate::connection::Connection;
use crate::error::SvnError;
use crate::repository::Repository;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;

pub const ROOT: &str = "https://svn.example.com/repo/trunk";

type Handler = Arc<dyn Fn(&CommandSpec) -> Result<Vec<u8>, SvnError> + Send + Sync>;

/// In-memory runner answering by verb and recording every spec it receives.
#[derive(Default)]
pub struct ScriptedRunner {
    handlers: Mutex<HashMap<Verb, Handler>>,
    chunks: Mutex<Vec<Vec<u8>>>,
    stream_exit: Mutex<Option<(i32, String)>>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on<F>(&self, verb: Verb, handler: F)
    where
        F: Fn(&CommandSpec) -> Result<Vec<u8>, SvnError> + Send + Sync + 'static,
    {
        self.handlers.lock().unwrap().insert(verb, Arc::new(handler));
    }

    pub fn on_ok(&self, verb: Verb, stdout: &str) {
        let stdout = stdout.as_bytes().to_vec();
        self.on(verb, move |_| Ok(stdout.clone()));
    }

    /// Chunks delivered by `run_streaming`.
    pub fn stream(&self, chunks: Vec<Vec<u8>>) {
        *self.chunks.lock().unwrap() = chunks;
    }

    /// Makes `run_streaming` exit with `code` after every scripted chunk went out.
    pub fn fail_stream_after(&self, code: i32, stderr: &str) {
        *self.stream_exit.lock().unwrap() = Some((code, stderr.to_string()));
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    pub fn verbs(&self) -> Vec<Verb> {
        self.calls().iter().map(|spec| spec.verb).collect()
    }

    fn answer(&self, spec: &CommandSpec) -> Result<Vec<u8>, SvnError> {
        self.calls.lock().unwrap().push(spec.clone());
        let handler = self.handlers.lock().unwrap().get(&spec.verb).cloned();
        match handler {
            Some(handler) => handler(spec),
            None => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<Output, SvnError> {
        let stdout = self.answer(spec)?;
        Ok(Output {
            stdout: Bytes::from(stdout),
            stderr: String::new(),
        })
    }

    async fn run_streaming(
        &self,
        spec: &CommandSpec,
        chunks: Sender<Bytes>,
        cancel: CancellationToken,
    ) -> Result<u64, SvnError> {
        self.answer(spec)?;
        let scripted = self.chunks.lock().unwrap().clone();
        let mut forwarded = 0;
        for chunk in scripted {
            if cancel.is_cancelled() {
                return Err(SvnError::Cancelled);
            }
            forwarded += chunk.len() as u64;
            if chunks.send(Bytes::from(chunk)).await.is_err() {
                return Err(SvnError::Cancelled);
            }
        }
        if let Some((code, stderr)) = self.stream_exit.lock().unwrap().clone() {
            return Err(failure(code, &stderr));
        }
        Ok(forwarded)
    }
}

pub fn repository(runner: Arc<ScriptedRunner>) -> Arc<Repository> {
    Arc::new(Repository::new(runner, Connection::new(ROOT)))
}

pub fn failure(code: i32, stderr: &str) -> SvnError {
    SvnError::Command {
        code: Some(code),
        stderr: stderr.to_string(),
    }
}

/// Builds `svn list --xml` output; `dir:` prefixed names are directories.
pub fn listing_xml(names: &[&str]) -> String {
    let mut xml = String::from("<?xml version=\"1.0\"?>\n<lists><list path=\"x\">");
    for name in names {
        match name.strip_prefix("dir:") {
            Some(dir) => xml.push_str(&format!(
                "<entry kind=\"dir\"><name>{dir}</name><commit revision=\"1\"><author>a</author></commit></entry>"
            )),
            None => xml.push_str(&format!(
                "<entry kind=\"file\"><name>{name}</name><size>{}</size><commit revision=\"1\"><author>a</author></commit></entry>",
                name.len()
            )),
        }
    }
    xml.push_str("</list></lists>");
    xml
}
