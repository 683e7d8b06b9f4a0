// Unless explicitly stated otherwise all files in this repository are licensed
// under the MIT/Apache-2.0 License, at your convenience
//
// This product includes software developed at Datadog (https://www.datadoghq.com/). Copyright 2020 Datadog, Inc.
//
bitflags::bitflags! {
    /// Readiness events on a registered file descriptor.
    ///
    /// Registrations request a subset of `INPUT | OUTPUT`; the loop reports
    /// `ERROR` and `HANGUP` unconditionally whenever the kernel surfaces
    /// them. The bit values are stable and part of the public API.
    pub struct Events: u32 {
        /// The file descriptor is available for read operations.
        const INPUT = 1 << 0;
        /// The file descriptor is available for write operations.
        const OUTPUT = 1 << 1;
        /// The file descriptor has encountered an error condition.
        const ERROR = 1 << 2;
        /// The file descriptor was hung up, e.g. the other end of a pipe
        /// was closed.
        const HANGUP = 1 << 3;
        /// The file descriptor is no longer valid, e.g. it was closed while
        /// still registered.
        const INVALID = 1 << 4;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_values_are_stable() {
        assert_eq!(Events::INPUT.bits(), 1 << 0);
        assert_eq!(Events::OUTPUT.bits(), 1 << 1);
        assert_eq!(Events::ERROR.bits(), 1 << 2);
        assert_eq!(Events::HANGUP.bits(), 1 << 3);
        assert_eq!(Events::INVALID.bits(), 1 << 4);
    }

    #[test]
    fn masks_compose() {
        let mask = Events::INPUT | Events::OUTPUT;
        assert!(mask.contains(Events::INPUT));
        assert!(mask.contains(Events::OUTPUT));
        assert!(!mask.contains(Events::HANGUP));
    }
}
