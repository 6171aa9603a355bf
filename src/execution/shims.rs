//! Support scripts injected before user code to route library output to stdout.

use serde::{Deserialize, Serialize};

const BASIC: &str = "# Basic output capture setup\n";

const MATPLOTLIB: &str = r#"import io
import base64
from matplotlib import pyplot as plt

plt.clf()
plt.close('all')
plt.switch_backend('agg')

def setup_matplotlib_output():
    def custom_show():
        if plt.gcf().get_size_inches().prod() * plt.gcf().dpi ** 2 > 25_000_000:
            print("Warning: Plot size too large, reducing quality")
            plt.gcf().set_dpi(100)

        png_buf = io.BytesIO()
        plt.savefig(png_buf, format='png')
        png_buf.seek(0)
        png_base64 = base64.b64encode(png_buf.read()).decode('utf-8')
        print(f'data:image/png;base64,{png_base64}')
        png_buf.close()

        plt.clf()
        plt.close('all')

    plt.show = custom_show
"#;

/// Ordered so that `Basic` always installs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shim {
    Basic,
    Matplotlib,
}

impl Shim {
    pub fn name(self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Matplotlib => "matplotlib",
        }
    }

    pub fn source(self) -> &'static str {
        match self {
            Self::Basic => BASIC,
            Self::Matplotlib => MATPLOTLIB,
        }
    }

    /// Call to run after the shim source, before the snippet.
    pub fn setup_call(self) -> Option<&'static str> {
        match self {
            Self::Basic => None,
            Self::Matplotlib => Some("setup_matplotlib_output()"),
        }
    }
}
