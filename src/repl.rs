//! The main thread: a line-editing REPL that hands each line to the
//! worker thread and waits for it to say whether to keep reading.

use rustyline::error::ReadlineError;
use rustyline::history::FileHistory;
use rustyline::Editor;
use std::sync::mpsc::{sync_channel, Receiver, Sender};

use crate::config::Config;
use crate::error::DynError;
use crate::ipc::{ShellMsg, WorkerMsg};
use crate::signals;
use crate::terminal::TerminalController;
use crate::worker::Worker;

pub fn run() -> Result<(), DynError> {
    let config = Config::from_env();
    let histfile = config.histfile.clone();
    let prompt = config.prompt.clone();

    let terminal = TerminalController::init()?;
    signals::install_shell_dispositions()?;

    let mut editor = Editor::<(), FileHistory>::new()?;
    if let Err(e) = editor.load_history(&histfile) {
        tracing::debug!(error = %e, "no history file loaded");
    }

    let (worker_tx, worker_rx) = std::sync::mpsc::channel();
    let (shell_tx, shell_rx) = sync_channel(0);

    signals::spawn_sigchld_forwarder(worker_tx.clone())?;
    Worker::new(terminal, config).spawn(worker_rx, shell_tx);

    let exit_val = read_eval_loop(&mut editor, &prompt, &worker_tx, &shell_rx);

    if let Err(e) = editor.save_history(&histfile) {
        tracing::warn!(error = %e, "failed to save history");
    }
    std::process::exit(exit_val);
}

fn read_eval_loop(
    editor: &mut Editor<(), FileHistory>,
    prompt: &str,
    worker_tx: &Sender<WorkerMsg>,
    shell_rx: &Receiver<ShellMsg>,
) -> i32 {
    loop {
        match editor.readline(prompt) {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                editor.add_history_entry(trimmed);
                worker_tx.send(WorkerMsg::Cmd(line)).unwrap();
                match shell_rx.recv().unwrap() {
                    ShellMsg::Continue(_) => continue,
                    ShellMsg::Quit(n) => return n,
                }
            }
            Err(ReadlineError::Interrupted) => {
                eprintln!("jcsh: type 'quit' or press Ctrl-D to exit");
            }
            Err(ReadlineError::Eof) => {
                worker_tx.send(WorkerMsg::Cmd("quit".to_string())).unwrap();
                match shell_rx.recv().unwrap() {
                    ShellMsg::Quit(n) => return n,
                    ShellMsg::Continue(_) => panic!("quit did not quit"),
                }
            }
            Err(e) => {
                eprintln!("jcsh: readline error: {e}");
                return 1;
            }
        }
    }
}
