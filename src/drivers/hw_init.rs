//! One-shot output peripheral initialization.
//!
//! Configures relay GPIOs as push-pull outputs and the LEDC timer used by
//! proportional outputs, using raw ESP-IDF sys calls.  Called once from
//! `main()` before the control loop starts.  On the host every call is a
//! logged no-op.

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

#[cfg(target_os = "espidf")]
use log::info;

use crate::pins;

/// Errors during one-shot peripheral initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwInitError {
    GpioConfigFailed(i32),
    LedcInitFailed(i32),
}

impl core::fmt::Display for HwInitError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::GpioConfigFailed(rc) => write!(f, "GPIO config failed (rc={})", rc),
            Self::LedcInitFailed(rc) => write!(f, "LEDC timer/channel config failed (rc={})", rc),
        }
    }
}

// ── GPIO outputs ──────────────────────────────────────────────

/// Configure `output_pins` as outputs, each driven to `idle_high` level
/// before anything else touches it.
#[cfg(target_os = "espidf")]
pub fn init_outputs(output_pins: &[(i32, bool)]) -> Result<(), HwInitError> {
    for &(pin, idle_high) in output_pins {
        let cfg = gpio_config_t {
            pin_bit_mask: 1u64 << pin,
            mode: gpio_mode_t_GPIO_MODE_OUTPUT,
            pull_up_en: gpio_pullup_t_GPIO_PULLUP_DISABLE,
            pull_down_en: gpio_pulldown_t_GPIO_PULLDOWN_DISABLE,
            intr_type: gpio_int_type_t_GPIO_INTR_DISABLE,
        };
        // SAFETY: called once from main() before the control loop; the
        // config struct outlives the call.
        let ret = unsafe { gpio_config(&cfg) };
        if ret != ESP_OK as i32 {
            return Err(HwInitError::GpioConfigFailed(ret));
        }
        // SAFETY: pin was configured as an output just above.
        unsafe { gpio_set_level(pin, u32::from(idle_high)) };
    }
    info!("hw_init: {} relay outputs configured", output_pins.len());
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
pub fn init_outputs(output_pins: &[(i32, bool)]) -> Result<(), HwInitError> {
    log::info!("hw_init(sim): {} relay outputs skipped", output_pins.len());
    Ok(())
}

/// Drive an output pin.  Returns the raw ESP-IDF error code on failure.
#[cfg(target_os = "espidf")]
pub fn gpio_write(pin: i32, high: bool) -> Result<(), i32> {
    // SAFETY: gpio_set_level writes to an already-configured output pin.
    let ret = unsafe { gpio_set_level(pin, u32::from(high)) };
    if ret == ESP_OK as i32 { Ok(()) } else { Err(ret) }
}

#[cfg(not(target_os = "espidf"))]
pub fn gpio_write(_pin: i32, _high: bool) -> Result<(), i32> {
    Ok(())
}

// ── LEDC PWM ─────────────────────────────────────────────────

/// Full-scale duty count at [`pins::PWM_RESOLUTION_BITS`].
pub const PWM_MAX_DUTY: u32 = (1 << pins::PWM_RESOLUTION_BITS) - 1;

/// Map a 0–100 % duty onto LEDC counts.  Out-of-range and NaN inputs clamp.
pub fn duty_counts(percent: f32) -> u32 {
    let p = if percent.is_nan() { 0.0 } else { percent.clamp(0.0, 100.0) };
    ((p / 100.0) * PWM_MAX_DUTY as f32).round() as u32
}

/// Configure the shared LEDC timer and attach a channel to each gpio.
/// Channel numbers follow slice order.
#[cfg(target_os = "espidf")]
pub fn init_pwm(gpios: &[i32]) -> Result<(), HwInitError> {
    if gpios.is_empty() {
        return Ok(());
    }
    let timer = ledc_timer_config_t {
        speed_mode: ledc_mode_t_LEDC_LOW_SPEED_MODE,
        timer_num: ledc_timer_t_LEDC_TIMER_0,
        duty_resolution: pins::PWM_RESOLUTION_BITS,
        freq_hz: pins::PWM_FREQ_HZ,
        clk_cfg: soc_periph_ledc_clk_src_legacy_t_LEDC_AUTO_CLK,
        ..Default::default()
    };
    // SAFETY: single-threaded init path; struct outlives the call.
    let ret = unsafe { ledc_timer_config(&timer) };
    if ret != ESP_OK as i32 {
        return Err(HwInitError::LedcInitFailed(ret));
    }

    for (channel, &gpio) in gpios.iter().enumerate() {
        // SAFETY: as above.
        let ret = unsafe {
            ledc_channel_config(&ledc_channel_config_t {
                speed_mode: ledc_mode_t_LEDC_LOW_SPEED_MODE,
                channel: ledc_channel_t_LEDC_CHANNEL_0 + channel as u32,
                timer_sel: ledc_timer_t_LEDC_TIMER_0,
                gpio_num: gpio,
                duty: 0,
                hpoint: 0,
                ..Default::default()
            })
        };
        if ret != ESP_OK as i32 {
            return Err(HwInitError::LedcInitFailed(ret));
        }
    }

    info!("hw_init: LEDC configured ({} channels, {} Hz)", gpios.len(), pins::PWM_FREQ_HZ);
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
pub fn init_pwm(gpios: &[i32]) -> Result<(), HwInitError> {
    log::info!("hw_init(sim): {} PWM channels skipped", gpios.len());
    Ok(())
}

/// Write a duty count to an LEDC channel.
#[cfg(target_os = "espidf")]
pub fn ledc_set(channel: u32, duty: u32) -> Result<(), i32> {
    // SAFETY: channel was configured in init_pwm(); duty register writes
    // only happen from the control loop.
    let ret = unsafe {
        let ret = ledc_set_duty(ledc_mode_t_LEDC_LOW_SPEED_MODE, channel, duty);
        if ret == ESP_OK as i32 {
            ledc_update_duty(ledc_mode_t_LEDC_LOW_SPEED_MODE, channel)
        } else {
            ret
        }
    };
    if ret == ESP_OK as i32 { Ok(()) } else { Err(ret) }
}

#[cfg(not(target_os = "espidf"))]
pub fn ledc_set(_channel: u32, _duty: u32) -> Result<(), i32> {
    Ok(())
}
