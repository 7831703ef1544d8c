use nibble8_core::{
    load_snapshot, save_snapshot, BlockStore, Cpu, CpuState, Exit, Memory, ScriptedConsole,
};
use std::fs;
use std::path::Path;

const MEMORY: usize = 0x1_0000;
const DISK: usize = 0x1_0000;

// Reads two values, accumulates into a disk cell in a loop, echoes progress.
//
// 0x00 IN R0
// 0x01 IN R1
// 0x02 LOAD R3,1
// 0x04 DISK_READ R2,[0x0040]     loop:
// 0x07 ADD R2,R0
// 0x09 DISK_WRITE R2,[0x0040]
// 0x0C OUT R2
// 0x0D SUB R1,R3
// 0x0F JZ 0x0015
// 0x12 JMP 0x0004
// 0x15 HALT
const PROGRAM: [u8; 22] = [
    0x90, 0x91, 0x13, 0x01, 0xB2, 0x40, 0x00, 0x32, 0x00, 0xC2, 0x40, 0x00, 0xA2, 0x41, 0x03,
    0x60, 0x15, 0x00, 0x50, 0x04, 0x00, 0xF0,
];

struct Finish {
    cpu: CpuState,
    memory: Vec<u8>,
    disk_cell: u8,
    outputs: Vec<u8>,
}

fn finish(disk_path: &Path, memory: &mut Memory, start: &CpuState, inputs: &[i64]) -> Finish {
    let mut disk = BlockStore::open_with_size(disk_path, DISK).unwrap();
    let mut cpu = Cpu::new(memory, &mut disk, ScriptedConsole::new(inputs.iter().copied()));
    cpu.restore(start);
    assert_eq!(cpu.run().unwrap(), Exit::Halted);
    let state = cpu.state();
    let outputs = cpu.console().output_values();
    let memory = cpu.memory().as_slice().to_vec();
    drop(cpu);
    Finish {
        cpu: state,
        memory,
        disk_cell: disk.read(0x40).unwrap(),
        outputs,
    }
}

#[test]
fn program_produces_expected_result() {
    let dir = tempfile::tempdir().unwrap();
    let mut memory = Memory::with_size(MEMORY);
    memory.load(0, &PROGRAM).unwrap();
    let done = finish(
        &dir.path().join("disk.bin"),
        &mut memory,
        &CpuState::default(),
        &[5, 3],
    );
    assert_eq!(done.outputs, vec![5, 10, 15]);
    assert_eq!(done.disk_cell, 15);
    assert_eq!(done.cpu.pc, 0x16);
}

#[test]
fn rerun_from_snapshot_reproduces_final_state() {
    let dir = tempfile::tempdir().unwrap();
    let disk_a = dir.path().join("a.bin");
    let disk_b = dir.path().join("b.bin");
    let snap = dir.path().join("mid.zip");
    // Input is consumed before the snapshot point, so the resumed run needs none.
    let inputs = [7i64, 4];

    let mut memory = Memory::with_size(MEMORY);
    memory.load(0, &PROGRAM).unwrap();
    let mid = {
        let mut disk = BlockStore::open_with_size(&disk_a, DISK).unwrap();
        let mut cpu = Cpu::new(&mut memory, &mut disk, ScriptedConsole::new(inputs));
        assert_eq!(cpu.run_for(9).unwrap(), Exit::StepLimit);
        let mid = cpu.state();
        save_snapshot(&snap, &mid, cpu.memory()).unwrap();
        mid
    };
    fs::copy(&disk_a, &disk_b).unwrap();

    let first = finish(&disk_a, &mut memory, &mid, &[]);

    let mut restored = Memory::with_size(MEMORY);
    let loaded = load_snapshot(&snap, &mut restored).unwrap();
    assert_eq!(loaded.cpu, mid);
    let second = finish(&disk_b, &mut restored, &loaded.cpu, &[]);

    assert_eq!(first.cpu, second.cpu);
    assert_eq!(first.memory, second.memory);
    assert_eq!(first.disk_cell, second.disk_cell);
    assert_eq!(first.outputs, second.outputs);
    assert_eq!(first.disk_cell, 28);
}
