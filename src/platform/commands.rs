// Shell command dialects per platform family

/// Which shell flavour a dialect speaks; selects the service-status form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialectKind {
    Linux,
    Bsd,
    MacOs,
}

/// Fixed set of shell commands for one platform family. Shared, never mutated.
#[derive(Debug, PartialEq, Eq)]
pub struct CommandDialect {
    pub kind: DialectKind,
    pub cpu_info: &'static str,
    pub cpu_usage: &'static str,
    pub memory_info: &'static str,
    pub disk_usage: &'static str,
    pub network_info: &'static str,
    pub process_list: &'static str,
    pub uptime: &'static str,
}

impl CommandDialect {
    /// Command whose first output line is the state of `service` (`active`, `inactive`,
    /// `unknown`, or whatever systemd reports).
    pub fn service_status(&self, service: &str) -> String {
        let service = shell_quote(service);
        match self.kind {
            DialectKind::Linux => {
                format!("systemctl is-active {service} 2>/dev/null || echo 'unknown'")
            }
            DialectKind::Bsd | DialectKind::MacOs => {
                format!("pgrep -f {service} >/dev/null && echo 'active' || echo 'inactive'")
            }
        }
    }

    /// Command printing the number of processes whose command line matches `pattern`.
    pub fn process_count(&self, pattern: &str) -> String {
        format!("pgrep -f {} | wc -l", shell_quote(pattern))
    }
}

/// Single-quotes `value` for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

pub static LINUX_COMMANDS: CommandDialect = CommandDialect {
    kind: DialectKind::Linux,
    cpu_info: "lscpu 2>/dev/null || cat /proc/cpuinfo",
    cpu_usage: "cat /proc/stat",
    memory_info: "cat /proc/meminfo",
    disk_usage: "df -h",
    network_info: "cat /proc/net/dev",
    process_list: "ps aux --no-headers",
    uptime: "uptime",
};

pub static BSD_COMMANDS: CommandDialect = CommandDialect {
    kind: DialectKind::Bsd,
    cpu_info: "sysctl -n hw.model hw.ncpu",
    cpu_usage: "top -b -n 1",
    memory_info: "sysctl -n hw.physmem hw.usermem vm.stats.vm.v_free_count",
    disk_usage: "df -h",
    network_info: "netstat -ibn",
    process_list: "ps aux",
    uptime: "uptime",
};

pub static MACOS_COMMANDS: CommandDialect = CommandDialect {
    kind: DialectKind::MacOs,
    cpu_info: "sysctl -n machdep.cpu.brand_string machdep.cpu.core_count",
    cpu_usage: "top -l 1 -n 0",
    memory_info: "vm_stat",
    disk_usage: "df -h",
    network_info: "netstat -ibn",
    process_list: "ps aux",
    uptime: "uptime",
};
