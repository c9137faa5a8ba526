mod common;

use common::TempCgroup;
use nix::unistd::getpid;
use zdocker::cgroup::ResourceLimits;

#[test]
fn apply_attaches_the_current_process() {
    let cgroup = TempCgroup::new().unwrap();
    cgroup.apply(getpid()).unwrap();
    let procs = std::fs::read_to_string(cgroup.as_path().join("cgroup.procs")).unwrap();
    assert!(procs.lines().any(|line| line == getpid().to_string()));
}

#[test]
fn set_writes_memory_and_cpu_weight() {
    let cgroup = TempCgroup::new().unwrap();
    cgroup
        .set(&ResourceLimits {
            memory: Some("100M".into()),
            cpu_share: Some(512),
            cpuset_cpus: None,
        })
        .unwrap();
    let memory = std::fs::read_to_string(cgroup.as_path().join("memory.max")).unwrap();
    assert_eq!(memory.trim(), "100M");
    let weight = std::fs::read_to_string(cgroup.as_path().join("cpu.weight")).unwrap();
    assert_eq!(weight.trim(), "5120");
}
