//! Interactive console and one-shot driver around a [`Supervisor`].

use std::io::Write;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use rtsandbox_core::ConsoleLine;
use rtsandbox_core::ConsoleReceiver;
use rtsandbox_core::SessionStatus;
use rtsandbox_core::StopOutcome;
use rtsandbox_core::Supervisor;
use rtsandbox_core::SupervisorError;
use rtsandbox_core::TargetSpec;
use tokio::io::AsyncBufRead;
use tokio::io::AsyncBufReadExt;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::commands::ConsoleCommand;
use crate::commands::RUN_USAGE;
use crate::commands::RunRequest;
use crate::commands::is_run_command;
use crate::commands::parse_console_line;
use crate::render::Renderer;

pub const PROMPT: &str = "sandbox > ";

const BANNER: &str = r"
╔════════════════════════════╗
║  RUNTIME SANDBOX           ║
║  Intercept > Observe       ║
╚════════════════════════════╝
";

const HELP_EXAMPLES: [(&str, &str); 7] = [
    ("run --python sample.py --opt 1", "Python with hooks"),
    ("run python sample.py --opt 1", "Auto-detected Python hooks"),
    (
        "run --python \"Anime API Hunter.py\"",
        "Python file with spaces in name",
    ),
    ("run ./malware_elf --config cfg.yaml", "ELF raw run"),
    ("run C:\\path\\tool.exe /S", "EXE raw run"),
    ("run /usr/local/bin/payload -v --mode test", "Generic binary raw run"),
    (
        "run --python ./renamed_py_bin --arg foo",
        "Force hooks for renamed Python",
    ),
];

/// Exit code reported when the target could not be launched at all.
pub const SPAWN_FAILURE_EXIT_CODE: i32 = 1;

/// Cloneable handle to the terminal shared by the printer task and the
/// command loop.
#[derive(Clone)]
pub struct ConsoleOutput {
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    renderer: Renderer,
}

impl ConsoleOutput {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout(), Renderer::detect())
    }

    pub fn new(writer: impl Write + Send + 'static, renderer: Renderer) -> Self {
        Self {
            writer: Arc::new(Mutex::new(Box::new(writer))),
            renderer,
        }
    }

    pub fn line(&self, line: &ConsoleLine) {
        self.write(&format!("{}\n", self.renderer.render(line)));
    }

    pub fn notice(&self, text: &str) {
        self.write(&format!("{}\n", self.renderer.notice(text)));
    }

    pub fn text(&self, text: &str) {
        self.write(&format!("{text}\n"));
    }

    pub fn prompt(&self) {
        self.write(PROMPT);
    }

    fn write(&self, text: &str) {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let result = writer
            .write_all(text.as_bytes())
            .and_then(|()| writer.flush());
        if let Err(err) = result {
            debug!(error = %err, "console write failed");
        }
    }
}

/// Print every supervisor line until all senders are gone.
pub fn spawn_printer(mut lines: ConsoleReceiver, output: ConsoleOutput) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(line) = lines.recv().await {
            output.line(&line);
        }
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

pub struct ConsoleController {
    supervisor: Supervisor,
    output: ConsoleOutput,
}

impl ConsoleController {
    pub fn new(supervisor: Supervisor, output: ConsoleOutput) -> Self {
        Self { supervisor, output }
    }

    /// Read commands from `input` until `exit`, end of input or Ctrl-C.
    pub async fn run_interactive<R>(&self, input: R)
    where
        R: AsyncBufRead + Unpin,
    {
        self.output.text(BANNER);
        let mut lines = input.lines();
        loop {
            self.output.prompt();
            let line = tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => line,
                    Ok(None) => "exit".to_string(),
                    Err(err) => {
                        debug!(error = %err, "failed to read console input");
                        "exit".to_string()
                    }
                },
                _ = tokio::signal::ctrl_c() => "exit".to_string(),
            };
            if self.handle_line(&line).await == Flow::Exit {
                break;
            }
        }
    }

    async fn handle_line(&self, line: &str) -> Flow {
        // A busy supervisor rejects `run` before its arguments are looked at.
        if is_run_command(line) && self.supervisor.status() == SessionStatus::Running {
            self.output
                .notice(&format!("[!] {}", SupervisorError::AlreadyRunning));
            return Flow::Continue;
        }

        let command = match parse_console_line(line) {
            Ok(command) => command,
            Err(err) => {
                self.output.notice(&format!("[!] {err}"));
                return Flow::Continue;
            }
        };

        match command {
            ConsoleCommand::Run(RunRequest::Usage) => {
                self.output.text(&format!("Usage: {RUN_USAGE}"));
            }
            ConsoleCommand::Run(RunRequest::Start(spec)) => {
                self.start(spec).await;
            }
            ConsoleCommand::Stop => {
                self.supervisor.stop().await;
                self.output.notice("[*] Target stopped.");
            }
            ConsoleCommand::Status => {
                self.output
                    .notice(&format!("[*] Status: {}", self.supervisor.status()));
            }
            ConsoleCommand::Help => self.print_help(),
            ConsoleCommand::Exit => {
                self.supervisor.stop().await;
                self.output.notice("[*] Sandbox stopped.");
                return Flow::Exit;
            }
            ConsoleCommand::Empty => {}
            ConsoleCommand::Unknown(_) => self.output.text("Unknown command. Type help."),
        }
        Flow::Continue
    }

    async fn start(&self, spec: TargetSpec) -> bool {
        match self.supervisor.start(spec).await {
            Ok(handle) => {
                debug!(session = %handle.id, mode = %handle.mode, "session started from console");
                self.output.notice("[*] Target started.");
                true
            }
            Err(SupervisorError::AlreadyRunning) => {
                self.output
                    .notice(&format!("[!] {}", SupervisorError::AlreadyRunning));
                false
            }
            Err(err) => {
                self.output.notice(&format!("[!] Failed to start: {err}"));
                false
            }
        }
    }

    /// Run `spec` to completion and return the exit code to report.
    ///
    /// Ctrl-C stops the target early.
    pub async fn run_once(&self, spec: TargetSpec) -> i32 {
        if !self.start(spec).await {
            return SPAWN_FAILURE_EXIT_CODE;
        }
        tokio::select! {
            () = self.supervisor.wait() => {}
            _ = tokio::signal::ctrl_c() => {
                debug!("interrupted; stopping target");
            }
        }
        match self.supervisor.stop().await {
            StopOutcome::AlreadyExited(code) | StopOutcome::Graceful(code) => code,
            StopOutcome::Forced => 128 + 9,
            StopOutcome::NotRunning => 0,
        }
    }

    fn print_help(&self) {
        self.output.text("Commands:");
        self.output.text(&format!("  {RUN_USAGE}"));
        self.output.text("  stop");
        self.output.text("  status");
        self.output.text("  help | -h | --help");
        self.output.text("  exit");
        self.output.text("");
        self.output.text("Examples:");
        let width = HELP_EXAMPLES
            .iter()
            .map(|(example, _)| example.len())
            .max()
            .unwrap_or_default();
        for (example, note) in HELP_EXAMPLES {
            self.output
                .text(&format!("  {example:<width$} # {note}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rtsandbox_core::SupervisorConfig;
    use rtsandbox_core::console_channel;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().expect("lock").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().expect("lock").clone()).expect("utf8")
        }
    }

    fn controller() -> (ConsoleController, Captured, ConsoleReceiver) {
        let captured = Captured::default();
        let (tx, rx) = console_channel();
        let supervisor = Supervisor::new(SupervisorConfig::default(), tx);
        let output = ConsoleOutput::new(captured.clone(), Renderer::plain());
        (ConsoleController::new(supervisor, output), captured, rx)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn interactive_loop_handles_commands_until_exit() {
        let (controller, captured, _rx) = controller();
        let input = "status\n\nrun\nrun --py\nrun -h\nfrobnicate\nstop\nexit\nstatus\n";
        controller.run_interactive(input.as_bytes()).await;

        let text = captured.contents();
        let expected = [
            "sandbox > [*] Status: Idle",
            "[!] No command provided.",
            "[!] No command provided after flags.",
            "Usage: run [--python|--py] <command...>",
            "Unknown command. Type help.",
            "[*] Target stopped.",
            "[*] Sandbox stopped.",
        ];
        let mut cursor = 0;
        for needle in expected {
            let found = text[cursor..]
                .find(needle)
                .unwrap_or_else(|| panic!("missing {needle:?} in {text:?}"));
            cursor += found + needle.len();
        }
        assert_eq!(
            text.matches("[*] Status:").count(),
            1,
            "input after exit is ignored"
        );
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn busy_supervisor_rejects_any_run_before_parsing() {
        let (controller, captured, _rx) = controller();
        assert_eq!(
            controller.handle_line("run sh -c 'exec sleep 30'").await,
            Flow::Continue
        );
        assert_eq!(controller.supervisor.status(), SessionStatus::Running);

        controller.handle_line("run\t\"unterminated").await;
        controller.handle_line("exit").await;

        let text = captured.contents();
        assert!(text.contains("[!] A command is already running."), "{text}");
        assert!(!text.contains("unbalanced quotes"), "{text}");
        assert_eq!(controller.supervisor.status(), SessionStatus::Idle);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn end_of_input_behaves_like_exit() {
        let (controller, captured, _rx) = controller();
        controller.run_interactive("help\n".as_bytes()).await;

        let text = captured.contents();
        assert!(text.contains("Commands:"));
        assert!(text.contains("Examples:"));
        assert!(text.contains("# Force hooks for renamed Python"));
        assert!(text.ends_with("[*] Sandbox stopped.\n"));
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn run_once_returns_target_exit_code() {
        let (controller, captured, rx) = controller();
        let printer = spawn_printer(rx, controller.output.clone());
        let spec = TargetSpec::new(
            vec!["sh".into(), "-c".into(), "echo hi; exit 4".into()],
            false,
        )
        .expect("argv");

        assert_eq!(controller.run_once(spec).await, 4);
        drop(controller);
        printer.await.expect("printer");

        let text = captured.contents();
        assert!(text.contains("[*] Target started."));
        assert!(text.contains("[OUT ] hi\n"));
        assert!(text.contains("[*] Target exited with code 4\n"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn run_once_reports_spawn_failure() {
        let (controller, captured, _rx) = controller();
        let spec = TargetSpec::new(vec!["/nonexistent/rtsandbox-bin".into()], false)
            .expect("argv");

        assert_eq!(controller.run_once(spec).await, SPAWN_FAILURE_EXIT_CODE);
        assert!(captured.contents().contains("[!] Failed to start:"));
    }
}
