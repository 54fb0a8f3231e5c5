//-
// Copyright (c) 2023, Jason Lingle
//
// This file is part of Crowmap.
//
// Crowmap is free software: you can  redistribute it and/or modify it under
// the terms of  the GNU General Public  License as published by  the Free
// Software Foundation, either version  3 of the License, or (at  your option)
// any later version.
//
// Crowmap is distributed in the hope  that it will be useful, but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Crowmap. If not, see <http://www.gnu.org/licenses/>.

//! SASL-IR: permission for clients to send the initial SASL response with
//! the AUTHENTICATE command itself. Pure capability gate; the AUTH
//! mechanisms consult it.

use std::sync::Arc;

use super::Registry;
use crate::session::SessionState;

pub(super) fn install(registry: &mut Registry) {
    registry.register_capability_if(
        "SASL-IR",
        Arc::new(|engine| SessionState::NotAuthenticated == engine.state),
    );
}
