use super::EventConfig;
use crate::ffi::bindings as b;

#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Software {
    CpuClock,
    TaskClock,

    PageFault,
    MinorPageFault,
    MajorPageFault,

    EmuFault,
    AlignFault,

    CtxSwitch,
    CgroupSwitch,

    Dummy,
    BpfOutput,
    CpuMigration,
}

super::try_from!(Software, value, {
    let config = match value {
        Software::CpuClock => b::PERF_COUNT_SW_CPU_CLOCK,
        Software::TaskClock => b::PERF_COUNT_SW_TASK_CLOCK,

        Software::PageFault => b::PERF_COUNT_SW_PAGE_FAULTS,
        Software::MinorPageFault => b::PERF_COUNT_SW_PAGE_FAULTS_MIN,
        Software::MajorPageFault => b::PERF_COUNT_SW_PAGE_FAULTS_MAJ,

        Software::EmuFault => b::PERF_COUNT_SW_EMULATION_FAULTS,
        Software::AlignFault => b::PERF_COUNT_SW_ALIGNMENT_FAULTS,

        Software::CtxSwitch => b::PERF_COUNT_SW_CONTEXT_SWITCHES,
        Software::CgroupSwitch => b::PERF_COUNT_SW_CGROUP_SWITCHES,

        Software::Dummy => b::PERF_COUNT_SW_DUMMY,
        Software::BpfOutput => b::PERF_COUNT_SW_BPF_OUTPUT,
        Software::CpuMigration => b::PERF_COUNT_SW_CPU_MIGRATIONS,
    } as u64;

    let event_config = EventConfig {
        ty: b::PERF_TYPE_SOFTWARE,
        config,
    };

    Ok(Self(event_config))
});
