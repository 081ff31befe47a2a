//! End-to-end protocol scenarios driven over real `UnixListener`-backed
//! servers and the real `dial`/`dialv_wait_inouterr` client path — no
//! mocked sockets, exercising the real accept/dispatch/relay state
//! machine rather than stubbing it.
//!
//! Every scenario spawns its server(s) in THREAD mode on a tempdir-scoped
//! saddr and wraps the body in a watchdog thread so a stuck accept/relay
//! can never hang the test suite.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use russ::error::{exit, wait};
use russ::{Server, ServiceNode, Session, SvrType};

fn run_with_timeout(name: &'static str, body: impl FnOnce() + Send + 'static) {
    let handle = std::thread::spawn(body);
    let timeout = Duration::from_secs(10);
    let start = Instant::now();
    loop {
        if handle.is_finished() {
            handle.join().unwrap();
            return;
        }
        if start.elapsed() >= timeout {
            panic!("{name} timed out after {timeout:?} — likely a deadlock in server/relay");
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

fn tempsock(tag: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(format!("{tag}.sock"));
    (dir, path)
}

fn spawn_server(root: ServiceNode, saddr: &Path) {
    spawn_server_with(root, saddr, SvrType::Thread, false);
}

/// Like `spawn_server`, but lets FORK-mode scenarios pick the server
/// type and `closeonaccept`.
fn spawn_server_with(root: ServiceNode, saddr: &Path, svr_type: SvrType, closeonaccept: bool) {
    let server = Server::new(root, svr_type)
        .announce(saddr, 0o600, None, None)
        .expect("announce")
        .set_await_timeout_ms(5_000)
        .set_closeonaccept(closeonaccept);
    std::thread::spawn(move || {
        let _ = server.run();
    });
    // Give the accept loop a moment to reach its first `accept()` call;
    // the socket is already bound/listening by the time `announce`
    // returns, so this is purely to avoid a first-dial race against
    // thread scheduling, not against the listener itself.
    std::thread::sleep(Duration::from_millis(20));
}

fn relay_stdin_to_stdout(session: &mut Session) {
    let Some(stdin) = session.sconn.fd(russ::cconn::FD_STDIN) else {
        let _ = session.sconn.fatal("error: no exit status", exit::SYSFAILURE);
        return;
    };
    let Some(stdout) = session.sconn.take_fd(russ::cconn::FD_STDOUT) else {
        let _ = session.sconn.fatal("error: no exit status", exit::SYSFAILURE);
        return;
    };
    let pair = russ::relay::RelayPair::with_owned_dst(stdin, stdout);
    let _ = russ::relay::relay(vec![pair], None, russ::DEADLINE_NEVER);
    let _ = session.sconn.exit(exit::SUCCESS);
}

#[test]
fn echo_scenario() {
    run_with_timeout("echo_scenario", || {
        let (_dir, saddr) = tempsock("echo");
        let mut root = ServiceNode::root();
        let node = root.add("echo");
        node.autoanswer = true;
        node.handler = Some(Arc::new(relay_stdin_to_stdout));
        spawn_server(root, &saddr);

        let deadline = russ::to_deadline(3_000);
        let (kind, status, stdout, stderr) = russ::dialv_wait_inouterr(
            &saddr,
            deadline,
            "execute",
            "/echo",
            Vec::new(),
            Vec::new(),
            b"hello\n",
            1 << 16,
            1 << 16,
        )
        .unwrap();

        assert_eq!(kind, wait::OK);
        assert_eq!(status, exit::SUCCESS);
        assert_eq!(stdout, b"hello\n");
        assert!(stderr.is_empty());
    });
}

#[test]
fn no_service_scenario() {
    run_with_timeout("no_service_scenario", || {
        let (_dir, saddr) = tempsock("noservice");
        let root = ServiceNode::root();
        spawn_server(root, &saddr);

        let deadline = russ::to_deadline(3_000);
        let (kind, status, _stdout, stderr) = russ::dialv_wait_inouterr(
            &saddr,
            deadline,
            "execute",
            "/absent",
            Vec::new(),
            Vec::new(),
            b"",
            1 << 16,
            1 << 16,
        )
        .unwrap();

        assert_eq!(kind, wait::OK);
        assert_eq!(status, exit::FAILURE);
        assert!(
            String::from_utf8_lossy(&stderr).starts_with("error: no service"),
            "stderr was {:?}",
            String::from_utf8_lossy(&stderr)
        );
    });
}

#[test]
fn list_scenario() {
    run_with_timeout("list_scenario", || {
        let (_dir, saddr) = tempsock("list");
        let mut root = ServiceNode::root();
        root.add("b");
        root.add("a");
        spawn_server(root, &saddr);

        let deadline = russ::to_deadline(3_000);
        let (kind, status, stdout, _stderr) = russ::dialv_wait_inouterr(
            &saddr,
            deadline,
            "list",
            "/",
            Vec::new(),
            Vec::new(),
            b"",
            1 << 16,
            1 << 16,
        )
        .unwrap();

        assert_eq!(kind, wait::OK);
        assert_eq!(status, exit::SUCCESS);
        assert_eq!(stdout, b"a\nb\n");
    });
}

#[test]
fn virtual_forwarding_scenario() {
    run_with_timeout("virtual_forwarding_scenario", || {
        let (_real_dir, real_saddr) = tempsock("real");
        let mut real_root = ServiceNode::root();
        let real_node = real_root.add("real");
        real_node.virtual_ = true;
        real_node.autoanswer = true;
        real_node.handler = Some(Arc::new(relay_stdin_to_stdout));
        spawn_server(real_root, &real_saddr);

        let (_proxy_dir, proxy_saddr) = tempsock("proxy");
        let downstream = real_saddr.clone();
        let mut proxy_root = ServiceNode::root();
        let proxy_node = proxy_root.add("proxy");
        proxy_node.virtual_ = true;
        proxy_node.handler = Some(Arc::new(move |session: &mut Session| {
            let deadline = russ::to_deadline(3_000);
            let mut req = session.req.clone();
            req.spath = format!("/real/{}", session.spath);
            if let Err(e) = session.sconn.redial_and_splice(&downstream, deadline, &req) {
                let _ = session.sconn.fatal(&e.to_string(), e.exit_status());
            }
        }));
        spawn_server(proxy_root, &proxy_saddr);

        let deadline = russ::to_deadline(3_000);
        let (kind, status, stdout, _stderr) = russ::dialv_wait_inouterr(
            &proxy_saddr,
            deadline,
            "execute",
            "/proxy/foo",
            Vec::new(),
            Vec::new(),
            b"ping",
            1 << 16,
            1 << 16,
        )
        .unwrap();

        assert_eq!(kind, wait::OK);
        assert_eq!(status, exit::SUCCESS);
        assert_eq!(stdout, b"ping");
    });
}

#[test]
fn help_fallback_scenario() {
    run_with_timeout("help_fallback_scenario", || {
        let (_dir, saddr) = tempsock("help");
        let mut root = ServiceNode::root();
        root.handler = Some(Arc::new(|session: &mut Session| {
            let stdout = session.sconn.fd(russ::cconn::FD_STDOUT).unwrap();
            let _ = nix::unistd::write(unsafe { std::os::fd::BorrowedFd::borrow_raw(stdout) }, b"top-level help text\n");
            let _ = session.sconn.exit(exit::SUCCESS);
        }));
        root.add("x"); // exists, but has no help handler of its own
        spawn_server(root, &saddr);

        let deadline = russ::to_deadline(3_000);
        let (kind, status, stdout, _stderr) = russ::dialv_wait_inouterr(
            &saddr,
            deadline,
            "help",
            "/x",
            Vec::new(),
            Vec::new(),
            b"",
            1 << 16,
            1 << 16,
        )
        .unwrap();

        assert_eq!(kind, wait::OK);
        assert_eq!(status, exit::SUCCESS);
        assert_eq!(stdout, b"top-level help text\n");
    });
}

/// spec.md §8 "After a fork-mode handler exits with status S, the
/// client's `wait` returns `(OK, S)`": drives the same echo shape as
/// `echo_scenario` but over a real `SvrType::Fork` server — double-fork,
/// `setsid`, `waitpid`-reaped intermediate child and all — instead of
/// `SvrType::Thread`.
#[test]
fn fork_echo_scenario() {
    run_with_timeout("fork_echo_scenario", || {
        let (_dir, saddr) = tempsock("fork-echo");
        let mut root = ServiceNode::root();
        let node = root.add("echo");
        node.autoanswer = true;
        node.handler = Some(Arc::new(relay_stdin_to_stdout));
        spawn_server_with(root, &saddr, SvrType::Fork, false);

        let deadline = russ::to_deadline(3_000);
        let (kind, status, stdout, stderr) = russ::dialv_wait_inouterr(
            &saddr,
            deadline,
            "execute",
            "/echo",
            Vec::new(),
            Vec::new(),
            b"hello from fork\n",
            1 << 16,
            1 << 16,
        )
        .unwrap();

        assert_eq!(kind, wait::OK);
        assert_eq!(status, exit::SUCCESS);
        assert_eq!(stdout, b"hello from fork\n");
        assert!(stderr.is_empty());
    });
}

/// spec.md §8 "Concurrency laws": "A fork-mode server started with
/// `closeonaccept=1` accepts exactly one request before its listening
/// socket closes; subsequent dials to the same saddr fail with
/// CannotDial."
#[test]
fn fork_closeonaccept_scenario() {
    run_with_timeout("fork_closeonaccept_scenario", || {
        let (_dir, saddr) = tempsock("fork-oneshot");
        let mut root = ServiceNode::root();
        let node = root.add("echo");
        node.autoanswer = true;
        node.handler = Some(Arc::new(relay_stdin_to_stdout));
        spawn_server_with(root, &saddr, SvrType::Fork, true);

        let deadline = russ::to_deadline(3_000);
        let (kind, status, stdout, _stderr) = russ::dialv_wait_inouterr(
            &saddr,
            deadline,
            "execute",
            "/echo",
            Vec::new(),
            Vec::new(),
            b"once\n",
            1 << 16,
            1 << 16,
        )
        .unwrap();
        assert_eq!(kind, wait::OK);
        assert_eq!(status, exit::SUCCESS);
        assert_eq!(stdout, b"once\n");

        // The listening socket closes right after the first accept; give
        // the server loop a moment to get there before retrying.
        std::thread::sleep(Duration::from_millis(50));
        let deadline = russ::to_deadline(1_000);
        let err = russ::dialv_wait(&saddr, deadline, "execute", "/echo", Vec::new(), Vec::new())
            .unwrap_err();
        assert!(matches!(err, russ::RussError::CannotDial(_)));
    });
}
