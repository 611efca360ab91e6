//! 设备型号表
//!
//! 通过序列号前缀选择协议变体。匹配规则：前缀之后紧跟至少一个 ASCII 数字，
//! 按表中顺序取第一个匹配项（因此 `mk` 必须排在 `m` 之前）。

use crate::geometry::GridSize;
use crate::variant::ProtocolVariant;

/// 默认波特率
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// 设备型号描述（静态、不可变）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceModel {
    pub serial_prefix: &'static str,
    pub variant: ProtocolVariant,
    /// 默认网格尺寸；`None` 表示需要向设备查询（mext）
    pub size: Option<GridSize>,
    pub friendly_name: &'static str,
    pub baud_rate: u32,
}

/// 已知设备型号
pub static DEVICE_MODELS: &[DeviceModel] = &[
    DeviceModel {
        serial_prefix: "m256-",
        variant: ProtocolVariant::Series,
        size: Some(GridSize::new(16, 16)),
        friendly_name: "monome 256",
        baud_rate: DEFAULT_BAUD_RATE,
    },
    DeviceModel {
        serial_prefix: "m128-",
        variant: ProtocolVariant::Series,
        size: Some(GridSize::new(16, 8)),
        friendly_name: "monome 128",
        baud_rate: DEFAULT_BAUD_RATE,
    },
    DeviceModel {
        serial_prefix: "m64-",
        variant: ProtocolVariant::Series,
        size: Some(GridSize::new(8, 8)),
        friendly_name: "monome 64",
        baud_rate: DEFAULT_BAUD_RATE,
    },
    DeviceModel {
        serial_prefix: "m40h",
        variant: ProtocolVariant::FortyH,
        size: Some(GridSize::new(8, 8)),
        friendly_name: "monome 40h",
        baud_rate: DEFAULT_BAUD_RATE,
    },
    DeviceModel {
        serial_prefix: "a40h-",
        variant: ProtocolVariant::FortyH,
        size: Some(GridSize::new(8, 8)),
        friendly_name: "arduinome",
        baud_rate: 57_600,
    },
    DeviceModel {
        serial_prefix: "mk",
        variant: ProtocolVariant::Mext,
        size: None,
        friendly_name: "monome kit",
        baud_rate: DEFAULT_BAUD_RATE,
    },
    DeviceModel {
        serial_prefix: "m",
        variant: ProtocolVariant::Mext,
        size: None,
        friendly_name: "monome",
        baud_rate: DEFAULT_BAUD_RATE,
    },
];

/// 按序列号查找型号
pub fn match_serial(serial: &str) -> Option<&'static DeviceModel> {
    DEVICE_MODELS.iter().find(|model| {
        serial
            .strip_prefix(model.serial_prefix)
            .and_then(|rest| rest.bytes().next())
            .is_some_and(|b| b.is_ascii_digit())
    })
}
