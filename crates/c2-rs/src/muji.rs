//! Allreduce across devices built from plain `Copy` and `Sum` operators.
//!
//! Given one blob per device, the fallback copies every blob onto the first device, sums the
//! copies there and copies the result back to every device. Each device ends up with the sum
//! under `<blob><suffix>`.

use crate::error::{C2Error, C2Result};
use crate::proto::{DeviceOption, NetDef, OperatorDef};

/// Appends an allreduce of `blobs` (one per entry of `devices`) to `net` and returns the names
/// of the reduced blobs, in device order.
pub fn allreduce<S: AsRef<str>>(
    net: &mut NetDef,
    blobs: &[S],
    suffix: &str,
    devices: &[DeviceOption],
) -> C2Result<Vec<String>> {
    allreduce_fallback(net, blobs, suffix, devices)
}

/// Copy-to-first-device, `Sum`, broadcast-back allreduce.
pub fn allreduce_fallback<S: AsRef<str>>(
    net: &mut NetDef,
    blobs: &[S],
    suffix: &str,
    devices: &[DeviceOption],
) -> C2Result<Vec<String>> {
    if blobs.len() != devices.len() {
        return Err(C2Error::configuration(format!(
            "allreduce needs one blob per device: {} blobs, {} devices",
            blobs.len(),
            devices.len()
        )));
    }
    let Some(root_device) = devices.first() else {
        return Err(C2Error::configuration("allreduce over zero devices"));
    };
    if suffix.is_empty() {
        return Err(C2Error::configuration(
            "allreduce suffix must be non-empty so results do not overwrite inputs",
        ));
    }

    let names: Vec<&str> = blobs.iter().map(|blob| blob.as_ref()).collect();
    let gathered: Vec<String> = names
        .iter()
        .enumerate()
        .map(|(index, name)| {
            if index == 0 {
                name.to_string()
            } else {
                format!("{name}{suffix}_temp_copy")
            }
        })
        .collect();
    for (index, name) in names.iter().enumerate().skip(1) {
        net.push_op(
            OperatorDef::new("Copy", [*name], [gathered[index].as_str()])
                .with_device(root_device.clone()),
        );
    }

    let root_reduced = format!("{}{suffix}", names[0]);
    net.push_op(
        OperatorDef::new("Sum", gathered.iter().map(String::as_str), [root_reduced.as_str()])
            .with_device(root_device.clone()),
    );

    let mut reduced = vec![root_reduced.clone()];
    for (name, device) in names.iter().zip(devices).skip(1) {
        let target = format!("{name}{suffix}");
        net.push_op(
            OperatorDef::new("Copy", [root_reduced.as_str()], [target.as_str()])
                .with_device(device.clone()),
        );
        reduced.push(target);
    }
    Ok(reduced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn fallback_gathers_sums_and_broadcasts() {
        let mut net = NetDef::new("allreduce");
        let devices = [DeviceOption::hip(0), DeviceOption::hip(1), DeviceOption::hip(2)];
        let reduced =
            allreduce_fallback(&mut net, &["g0", "g1", "g2"], "_reduced", &devices).unwrap();
        assert_eq!(reduced, vec!["g0_reduced", "g1_reduced", "g2_reduced"]);

        let types: Vec<&str> = net.op.iter().map(|op| op.op_type.as_str()).collect();
        assert_eq!(types, vec!["Copy", "Copy", "Sum", "Copy", "Copy"]);
        let sum = &net.op[2];
        assert_eq!(sum.input, vec!["g0", "g1_reduced_temp_copy", "g2_reduced_temp_copy"]);
        assert_eq!(sum.device_option, Some(DeviceOption::hip(0)));
        assert_eq!(net.op[4].device_option, Some(DeviceOption::hip(2)));
        assert_eq!(net.op[4].output, vec!["g2_reduced"]);
    }

    #[test]
    fn blob_and_device_counts_must_match() {
        let mut net = NetDef::new("n");
        let err = allreduce(&mut net, &["a"], "_r", &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(net.op.is_empty());
    }
}
