use std::process::ExitCode;

use probox::{
    agent, list_containers, resolve, AgentManager, CliRuntime, Config, Context, CreateOptions,
    Orchestrator, ProboxError, SystemProcesses,
};

use crate::cli::{Cli, Cmd};

fn fail(e: &ProboxError) -> ExitCode {
    let use_err = probox::color_enabled_stderr();
    probox::log_error_stderr(use_err, &format!("probox: {e}"));
    ExitCode::from(probox::exit_code_for_error(e))
}

fn exit_with(code: i32) -> ExitCode {
    ExitCode::from((code & 0xff) as u8)
}

pub fn dispatch(cli: &Cli) -> ExitCode {
    match execute(cli) {
        Ok(code) => code,
        Err(e) => fail(&e),
    }
}

fn execute(cli: &Cli) -> probox::Result<ExitCode> {
    let config = Config::load()?;
    let runtime = CliRuntime::detect(config.runtime.as_deref())?
        .with_timeout(config.timeout())
        .verbose(cli.verbose);
    let processes = SystemProcesses;
    let agents = AgentManager::new(
        &processes,
        config.agent_program.clone(),
        agent::default_socket_dir(),
    );
    let ctx = Context::current()?;
    let orch = Orchestrator::new(&runtime, agents, &config, ctx);

    // Fresh view of the runtime for every command; nothing survives between invocations.
    let dir = list_containers(&runtime)?;
    let cwd = orch.context().cwd.clone();

    match &cli.command {
        Cmd::Create {
            path,
            name,
            from,
            no_overlay,
        } => {
            let opts = CreateOptions {
                path: path.clone(),
                name: name.clone(),
                from: from.clone(),
                push_overlay: config.push_overlay_on_create && !no_overlay,
            };
            let record = orch.create(&dir, &opts)?;
            println!("{}", record.name);
            Ok(ExitCode::from(0))
        }
        Cmd::Run {
            path_or_name,
            command,
        } => {
            let record = resolve(path_or_name.as_deref(), &dir, &cwd)?;
            let use_err = probox::color_enabled_stderr();
            probox::log_info_stderr(use_err, &format!("probox: found box '{}'", record.name));
            Ok(exit_with(orch.run(record, command)?))
        }
        Cmd::Stop { path_or_name } => {
            let record = resolve(path_or_name.as_deref(), &dir, &cwd)?;
            orch.stop(record)?;
            Ok(ExitCode::from(0))
        }
        Cmd::Rm { path_or_name } => {
            let record = resolve(path_or_name.as_deref(), &dir, &cwd)?;
            orch.remove(record)?;
            Ok(ExitCode::from(0))
        }
        Cmd::Temp {
            path,
            from,
            command,
        } => {
            let code = orch.temp(&dir, path.clone(), from.clone(), command)?;
            Ok(exit_with(code))
        }
        Cmd::Ps => {
            print_boxes(&dir);
            Ok(ExitCode::from(0))
        }
        Cmd::Push { path_or_name } => {
            let record = resolve(path_or_name.as_deref(), &dir, &cwd)?;
            orch.push_overlay(record)?;
            Ok(ExitCode::from(0))
        }
        Cmd::Image { from } => {
            println!("{}", orch.image_for(from.as_deref())?);
            Ok(ExitCode::from(0))
        }
    }
}

fn print_boxes(dir: &probox::ContainerDirectory) {
    let use_out = probox::color_enabled_stdout();
    let width = dir
        .records()
        .map(|r| r.name.len())
        .max()
        .unwrap_or(4)
        .max(4);
    println!("{:<width$}  {:<7}  PATH", "NAME", "STATE");
    for r in dir.records() {
        let state = if r.running { "running" } else { "stopped" };
        let state = probox::paint(
            use_out && r.running,
            "\x1b[32m",
            &format!("{state:<7}"),
        );
        println!("{:<width$}  {}  {}", r.name, state, r.project_path.display());
    }
}

