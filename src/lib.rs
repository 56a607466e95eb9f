/// 命令行入口: `dock`, `mode`, `daemon` 三个子命令
pub mod cli;

/// TOML 配置文件以及各子系统的默认值
pub mod config;

/// 数位板半屏/全屏协议: hidraw feature report 与 I2C 回退
pub mod digitizer;

/// 键盘底座信号读取 (ACPI, EC 寄存器, sysfs)
pub mod dock_state;

/// 内核接口的底层收发: ioctl, 重试, 错误分类
pub mod hardware_transport;

/// 带时间戳的 JSON 行输出
pub mod output;

/// 去抖动的底座策略守护进程以及状态文件发布
pub mod policy;

// 底座信号只有两个来源是可信的: GDST 和 CMMD 命令字节
// sysfs 那个节点在别的机型上也存在, 只能当作最后的兜底

// hidraw 的写入要么全部成功要么全部回滚, 不然两个 interface 的模式会不一致
// I2C 那条路是最后的手段, 只在 hidraw 失败或者找不到设备时走
