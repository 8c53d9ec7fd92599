fn main() {
    kvarena::cmdline();
}
