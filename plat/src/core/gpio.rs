//! Static GPIO pin-name tables per board revision.

use serde::Serialize;

/// Physical pin name paired with the board signal wired to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoardGpio {
    pub pin: &'static str,
    pub signal: &'static str,
}

const fn gpio(pin: &'static str, signal: &'static str) -> BoardGpio {
    BoardGpio { pin, signal }
}

pub static BOARD_GPIO_TABLE_V1: &[BoardGpio] = &[
    gpio("GPIOA6", "BMC_MDC"),
    gpio("GPIOA7", "BMC_MDIO"),
    gpio("GPIOF2", "BMC_EEPROM_SEL"),
    gpio("GPIOF3", "BMC_EEPROM_SS"),
    gpio("GPIOF4", "BMC_EEPROM_MISO"),
    gpio("GPIOF5", "BMC_EEPROM_MOSI"),
    gpio("GPIOF6", "BMC_EEPROM_SCK"),
    gpio("GPIOAA0", "BMC_FPGA_GPIO7"),
    gpio("GPIOAA1", "BMC_FPGA_GPIO6"),
    gpio("GPIOAA2", "BMC_FPGA_GPIO4"),
    gpio("GPIOAA3", "BMC_FPGA_GPIO5"),
    gpio("GPIOAA4", "BMC_JTAG_TDO"),
    gpio("GPIOAA5", "BMC_JTAG_TDI"),
    gpio("GPIOAA6", "BMC_JTAG_TMS"),
    gpio("GPIOAA7", "BMC_JTAG_TCK"),
    gpio("GPIOAB0", "EMMC_RST_N"),
    gpio("GPIOE0", "BMC_SPI_WP0_N"),
    gpio("GPIOE1", "BMC_SPI_WP1_N"),
    gpio("GPIOE4", "BIOS_UPGRADE_CPLD"),
    gpio("GPIOE5", "BIOS_MUX_SWITCH"),
    gpio("GPIOE6", "BMC_GPIOD6"),
    gpio("GPIOE7", "BMC_GPIOD7"),
    gpio("GPIOG4", "BMC_I2C_ALT1"),
    gpio("GPIOG5", "BMC_I2C_ALT2"),
    gpio("GPIOG6", "BMC_I2C_ALT3"),
    gpio("GPIOG7", "BMC_I2C_ALT4"),
    gpio("GPIOJ1", "BMC_RST_OUT"),
    gpio("GPIOL0", "RSVD_NCTS1"),
    gpio("GPIOL1", "RSVD_NDCD1"),
    gpio("GPIOL2", "RSVD_NDSR1"),
    gpio("GPIOL3", "RSVD_NRI1"),
    gpio("GPIOL4", "RSVD_NDTR1"),
    gpio("GPIOL5", "RSVD_NRTS1"),
    gpio("GPIOM4", "BMC_FPGA_GPIO1"),
    gpio("GPIOM5", "BMC_FPGA_GPIO2"),
    gpio("GPIOS2", "COME_12V_EN_B"),
    gpio("GPIOS3", "5V_EN_B"),
    gpio("GPIOY0", "CB_SUS_S3_N"),
    gpio("GPIOY1", "CB_SUS_S5_N"),
    gpio("GPIOY2", "SIOPWREQ"),
    gpio("GPIOY3", "SIOONCTRL"),
    gpio("GPIOZ0", "RESET_BTN_N"),
    gpio("GPIOZ1", "CB_PWR_OK"),
];

/// Revision names accepted by [`board_gpio_table`].
pub const REVISIONS: &[&str] = &["v1"];

pub fn board_gpio_table(revision: &str) -> Option<&'static [BoardGpio]> {
    match revision {
        "v1" => Some(BOARD_GPIO_TABLE_V1),
        _ => None,
    }
}
