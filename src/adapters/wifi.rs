//! WiFi station-mode adapter.
//!
//! Brings up the STA interface the broker link runs over.  Reconnection
//! is not handled here: a lost network surfaces as a lost bus session and
//! the [`ConnectionManager`](crate::link::ConnectionManager) retries (and,
//! past its ceiling, restarts the device).

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiError {
    InvalidSsid,
    InvalidPassword,
}

impl fmt::Display for WifiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSsid => write!(f, "SSID invalid (must be 1-32 printable ASCII bytes)"),
            Self::InvalidPassword => write!(f, "password invalid (must be 8-64 bytes for WPA2, or empty for open)"),
        }
    }
}

impl std::error::Error for WifiError {}

fn is_printable_ascii(s: &str) -> bool {
    s.bytes().all(|b| (0x20..=0x7E).contains(&b))
}

pub fn validate_ssid(ssid: &str) -> Result<(), WifiError> {
    if ssid.is_empty() || ssid.len() > 32 || !is_printable_ascii(ssid) {
        return Err(WifiError::InvalidSsid);
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), WifiError> {
    if password.is_empty() {
        return Ok(());
    }
    if password.len() < 8 || password.len() > 64 {
        return Err(WifiError::InvalidPassword);
    }
    Ok(())
}

#[cfg(target_os = "espidf")]
pub use esp::connect_sta;

#[cfg(target_os = "espidf")]
mod esp {
    use esp_idf_hal::modem::Modem;
    use esp_idf_hal::peripheral::Peripheral;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use esp_idf_svc::wifi::{AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi};
    use log::info;

    use super::{WifiError, validate_password, validate_ssid};

    /// Join `ssid` and block until the interface has an address.
    pub fn connect_sta(
        modem: impl Peripheral<P = Modem> + 'static,
        sysloop: EspSystemEventLoop,
        nvs: EspDefaultNvsPartition,
        ssid: &str,
        password: &str,
    ) -> anyhow::Result<BlockingWifi<EspWifi<'static>>> {
        validate_ssid(ssid)?;
        validate_password(password)?;

        let mut wifi = BlockingWifi::wrap(EspWifi::new(modem, sysloop.clone(), Some(nvs))?, sysloop)?;
        let auth_method = if password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };
        wifi.set_configuration(&Configuration::Client(ClientConfiguration {
            ssid: ssid.try_into().map_err(|_| WifiError::InvalidSsid)?,
            password: password.try_into().map_err(|_| WifiError::InvalidPassword)?,
            auth_method,
            ..Default::default()
        }))?;

        wifi.start()?;
        info!("WiFi: connecting to '{}'", ssid);
        wifi.connect()?;
        wifi.wait_netif_up()?;
        let ip = wifi.wifi().sta_netif().get_ip_info()?;
        info!("WiFi: connected, ip={}", ip.ip);
        Ok(wifi)
    }
}
