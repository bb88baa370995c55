// Copyright 2023 aztecher, or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

pub mod ioctls;
pub mod kvm;
pub mod memory;
pub mod vcpu;
pub mod vm;
