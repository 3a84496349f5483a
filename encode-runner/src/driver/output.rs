// 输出文件命名
//
// <codec>_<fps>fps_<w>x<h>_<bitrate>bps_iint<i>_m<mode>.<ext>

use common::{keys, ContainerFormat, FormatValue, MediaFormat};

fn number(format: &MediaFormat, key: &str) -> String {
    match format.get(key) {
        Some(FormatValue::Int(value)) => value.to_string(),
        Some(FormatValue::Long(value)) => value.to_string(),
        Some(FormatValue::Float(value)) if value.fract() == 0.0 => (*value as i64).to_string(),
        Some(FormatValue::Float(value)) => value.to_string(),
        _ => "0".to_string(),
    }
}

/// Encoded output file name for `codec_name` configured with `format`
pub fn output_filename(codec_name: &str, format: &MediaFormat) -> String {
    let container = ContainerFormat::for_codec(codec_name);
    format!(
        "{}_{}fps_{}x{}_{}bps_iint{}_m{}.{}",
        codec_name.to_lowercase(),
        number(format, keys::FRAME_RATE),
        number(format, keys::WIDTH),
        number(format, keys::HEIGHT),
        number(format, keys::BIT_RATE),
        number(format, keys::I_FRAME_INTERVAL),
        number(format, keys::BITRATE_MODE),
        container.extension()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_avc_filename() {
        let mut format = MediaFormat::video("video/avc", 1280, 720);
        format.set_float(keys::FRAME_RATE, 30.0);
        format.set_integer(keys::BIT_RATE, 1_000_000);
        format.set_integer(keys::I_FRAME_INTERVAL, 10);
        format.set_integer(keys::BITRATE_MODE, 2);

        assert_eq!(
            output_filename("Sim.AVC.Encoder", &format),
            "sim.avc.encoder_30fps_1280x720_1000000bps_iint10_m2.mp4"
        );
    }

    #[test]
    fn test_vp_filename_and_missing_values() {
        let format = MediaFormat::video("video/x-vnd.on2.vp8", 320, 240);
        assert_eq!(
            output_filename("sim.vp8.encoder", &format),
            "sim.vp8.encoder_0fps_320x240_0bps_iint0_m0.webm"
        );
    }

    #[test]
    fn test_fractional_rate() {
        let mut format = MediaFormat::video("video/hevc", 640, 480);
        format.set_float(keys::FRAME_RATE, 29.97);
        assert!(output_filename("sim.hevc.encoder", &format).contains("_29.97fps_"));
    }
}
